//! CRM Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use crm_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    integrations::{LoggingSink, WebhookSink},
    middleware::{AuthConfig, AuthLayer},
    service::CrmService,
    store::PgStore,
    telemetry::{init_telemetry, redact_url, TelemetryConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match std::env::var("CRM_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    let telemetry = init_telemetry(&TelemetryConfig::from(&config.observability))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting CRM server");

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.migrate().await?;
    }
    let latency = db.check_connectivity().await?;
    tracing::info!(latency_ms = latency.as_millis() as u64, "Database ready");

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let mut service = CrmService::from_store(store).with_sink(Arc::new(LoggingSink));
    if let Some(url) = &config.integrations.stage_webhook_url {
        tracing::info!(url = %redact_url(url), "Stage webhook enabled");
        service = service.with_sink(Arc::new(WebhookSink::new(
            url.clone(),
            config.integrations.webhook_timeout,
        )));
    }

    let auth = AuthLayer::from_config(AuthConfig::from_settings(&config.auth))?;
    let state = AppState::new(service, telemetry.metrics.clone()).with_database(db);
    let app = api::build_router(state, auth);

    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(host, config.server.port);
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
