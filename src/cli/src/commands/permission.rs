//! Permission commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum PermissionCommands {
    /// List your effective permissions
    List,

    /// Check a single resource/action pair
    Check {
        /// Resource, e.g. lead
        resource: String,
        /// Action, e.g. update
        action: String,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct PermissionsInfo {
    organization_id: Uuid,
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct CheckInfo {
    resource: String,
    action: String,
    allowed: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct PermissionRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
}

pub async fn execute(cmd: PermissionCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        PermissionCommands::List => {
            let info: PermissionsInfo = client.get("/api/v1/permissions").await?;
            match format {
                OutputFormat::Table => {
                    output::print_detail("Organization", &info.organization_id.to_string());
                    let rows: Vec<PermissionRow> = info
                        .permissions
                        .iter()
                        .map(|p| {
                            let (resource, action) = p.split_once(':').unwrap_or((p, "*"));
                            PermissionRow {
                                resource: resource.to_string(),
                                action: action.to_string(),
                            }
                        })
                        .collect();
                    output::print_list(&rows, format);
                }
                _ => output::print_item(&info, format),
            }
        }

        PermissionCommands::Check { resource, action } => {
            let info: CheckInfo = client
                .get_with_query(
                    "/api/v1/permissions/check",
                    &[("resource", resource.as_str()), ("action", action.as_str())],
                )
                .await?;
            match format {
                OutputFormat::Table => {
                    let pair = format!("{}:{}", info.resource, info.action);
                    if info.allowed {
                        output::print_success(&format!("{} allowed", pair));
                    } else {
                        output::print_error(&format!("{} denied", pair));
                    }
                }
                _ => output::print_item(&info, format),
            }
        }
    }

    Ok(())
}
