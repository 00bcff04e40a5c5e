//! Health check command.
//!
//! Queries the `/health` endpoint and displays server and database status.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include database pool statistics
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("Server Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }

            if let Some(db) = health.get("database") {
                let db_status = db.get("status").and_then(|v| v.as_str()).unwrap_or("?");
                output::print_detail("Database", db_status);

                if args.detailed {
                    if let Some(latency) = db.get("latency_ms").and_then(|v| v.as_u64()) {
                        output::print_detail("DB latency", &format!("{} ms", latency));
                    }
                    if let Some(pool) = db.get("pool") {
                        for key in ["size", "idle", "active", "max_connections"] {
                            if let Some(n) = pool.get(key).and_then(|v| v.as_u64()) {
                                output::print_detail(&format!("pool.{}", key), &n.to_string());
                            }
                        }
                    }
                }
            }

            if status == "healthy" {
                output::print_success("All systems operational");
            } else {
                output::print_error(&format!("System status: {}", status));
            }
        }
        _ => output::print_item(&health, format),
    }

    Ok(())
}
