//! Customer commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum CustomerCommands {
    /// Show a customer
    Show {
        customer_id: Uuid,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct CustomerInfo {
    id: Uuid,
    name: String,
    status: String,
    converted_from_lead: Option<Uuid>,
    #[serde(default)]
    contact: serde_json::Value,
}

pub async fn execute(cmd: CustomerCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        CustomerCommands::Show { customer_id } => {
            let customer: CustomerInfo = client
                .get(&format!("/api/v1/customers/{}", customer_id))
                .await?;
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Customer: {}", customer.name));
                    output::print_detail("ID", &customer.id.to_string());
                    output::print_detail("Status", &customer.status);
                    if let Some(lead) = customer.converted_from_lead {
                        output::print_detail("From lead", &lead.to_string());
                    }
                    if let Some(email) = customer.contact.get("email").and_then(|v| v.as_str()) {
                        output::print_detail("Email", email);
                    }
                }
                _ => output::print_item(&customer, format),
            }
        }
    }

    Ok(())
}
