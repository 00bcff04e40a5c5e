//! Database connection pool.
//!
//! Owns the PostgreSQL pool behind [`PgStore`](crate::store::PgStore), applies
//! the embedded migrations and answers the readiness check.

use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{CrmError, Result};

/// Connectivity latency above which the health check logs a warning.
const SLOW_PING: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    max_connections: u32,
}

/// Snapshot of the connection pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub active: u32,
    pub max_connections: u32,
}

impl Database {
    /// Connect with the configured pool bounds.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to connect to database");
                CrmError::from(e)
            })?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool ready"
        );
        Ok(Self {
            pool,
            max_connections: config.max_connections,
        })
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip `SELECT 1` and return the latency.
    pub async fn check_connectivity(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Database connectivity check failed");
                CrmError::from(e)
            })?;
        let latency = start.elapsed();
        if latency > SLOW_PING {
            warn!(
                latency_ms = latency.as_millis() as u64,
                "Database connectivity check latency is high"
            );
        }
        Ok(latency)
    }

    pub fn pool_stats(&self) -> PoolStats {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            size,
            idle,
            active: size.saturating_sub(idle),
            max_connections: self.max_connections,
        }
    }
}
