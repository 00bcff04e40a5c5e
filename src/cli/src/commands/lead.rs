//! Lead commands.
//!
//! Create, show and move leads through the pipeline. Moving a lead into a
//! closed-won stage converts it into a customer on the server.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use uuid::Uuid;

use super::{stages_for_display, HistoryEntry, LeadInfo, MoveRequest, TransitionInfo};
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum LeadCommands {
    /// Create a lead in the first stage
    Create {
        /// Lead name
        #[arg(short, long)]
        name: String,

        /// Contact email (used to match existing customers on conversion)
        #[arg(short, long)]
        email: Option<String>,

        #[arg(short, long)]
        phone: Option<String>,

        #[arg(short, long)]
        company: Option<String>,
    },

    /// Show a lead
    Show {
        lead_id: Uuid,
    },

    /// Move a lead to a stage (id or name, case-insensitive)
    Move {
        lead_id: Uuid,

        /// Target stage
        stage: String,

        /// Note recorded in the stage history
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Show the stage history of a lead
    History {
        lead_id: Uuid,
    },
}

#[derive(Serialize, Default)]
struct ContactBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<String>,
}

#[derive(Serialize)]
struct CreateLeadRequest {
    name: String,
    contact: ContactBody,
}

/// Stage names are only fetched for table output.
async fn show(client: &ApiClient, lead: &LeadInfo, format: OutputFormat) {
    let stages = if format.is_table() {
        stages_for_display(client).await
    } else {
        Vec::new()
    };
    output::print_lead(lead, &stages, format);
}

pub async fn execute(cmd: LeadCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        LeadCommands::Create {
            name,
            email,
            phone,
            company,
        } => {
            let body = CreateLeadRequest {
                name,
                contact: ContactBody {
                    email,
                    phone,
                    company,
                },
            };
            let lead: LeadInfo = client.post("/api/v1/leads", &body).await?;
            if format.is_table() {
                output::print_success("Lead created");
            }
            show(client, &lead, format).await;
        }

        LeadCommands::Show { lead_id } => {
            let lead: LeadInfo = client.get(&format!("/api/v1/leads/{}", lead_id)).await?;
            show(client, &lead, format).await;
        }

        LeadCommands::Move {
            lead_id,
            stage,
            note,
        } => {
            let outcome: TransitionInfo = client
                .post(
                    &format!("/api/v1/leads/{}/stage", lead_id),
                    &MoveRequest { stage, note },
                )
                .await?;
            output::print_transition("Lead", &outcome, format);
        }

        LeadCommands::History { lead_id } => {
            let entries: Vec<HistoryEntry> = client
                .get(&format!("/api/v1/leads/{}/history", lead_id))
                .await?;
            let stages = stages_for_display(client).await;
            output::print_history(&entries, &stages, format);
        }
    }

    Ok(())
}
