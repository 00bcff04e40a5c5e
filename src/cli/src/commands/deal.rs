//! Deal commands.

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use uuid::Uuid;

use super::{stages_for_display, DealInfo, HistoryEntry, MoveRequest, TransitionInfo};
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum DealCommands {
    /// Create a deal in an open stage
    Create {
        /// Deal name
        #[arg(short, long)]
        name: String,

        /// Value in major units, e.g. 1250.50
        #[arg(short, long, default_value = "0")]
        value: String,

        /// ISO currency code
        #[arg(short, long, default_value = "USD")]
        currency: String,

        /// Lead the deal came from
        #[arg(long)]
        lead: Option<Uuid>,

        /// Existing customer
        #[arg(long)]
        customer: Option<Uuid>,

        /// Initial stage (defaults to the first stage)
        #[arg(short, long)]
        stage: Option<String>,
    },

    /// Show a deal
    Show {
        deal_id: Uuid,
    },

    /// Move a deal to a stage (id or name, case-insensitive)
    Move {
        deal_id: Uuid,

        /// Target stage
        stage: String,

        /// Note recorded in the stage history
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Show the stage history of a deal
    History {
        deal_id: Uuid,
    },
}

#[derive(Serialize)]
struct CreateDealRequest {
    name: String,
    value_cents: i64,
    currency: String,
    lead_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    stage: Option<String>,
}

/// Parse `1250.5` or `1250.50` into cents.
fn parse_cents(value: &str) -> Result<i64> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if frac.len() > 2 || (whole.is_empty() && frac.is_empty()) {
        bail!("invalid amount: {}", value);
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse()? };
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        format!("{:0<2}", frac).parse()?
    };
    if whole < 0 || value.starts_with('-') {
        bail!("amount must not be negative");
    }
    Ok(whole * 100 + frac)
}

/// Stage names are only fetched for table output.
async fn show(client: &ApiClient, deal: &DealInfo, format: OutputFormat) {
    let stages = if format.is_table() {
        stages_for_display(client).await
    } else {
        Vec::new()
    };
    output::print_deal(deal, &stages, format);
}

pub async fn execute(cmd: DealCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        DealCommands::Create {
            name,
            value,
            currency,
            lead,
            customer,
            stage,
        } => {
            let body = CreateDealRequest {
                name,
                value_cents: parse_cents(&value)?,
                currency,
                lead_id: lead,
                customer_id: customer,
                stage,
            };
            let deal: DealInfo = client.post("/api/v1/deals", &body).await?;
            if format.is_table() {
                output::print_success("Deal created");
            }
            show(client, &deal, format).await;
        }

        DealCommands::Show { deal_id } => {
            let deal: DealInfo = client.get(&format!("/api/v1/deals/{}", deal_id)).await?;
            show(client, &deal, format).await;
        }

        DealCommands::Move {
            deal_id,
            stage,
            note,
        } => {
            let outcome: TransitionInfo = client
                .post(
                    &format!("/api/v1/deals/{}/stage", deal_id),
                    &MoveRequest { stage, note },
                )
                .await?;
            output::print_transition("Deal", &outcome, format);
        }

        DealCommands::History { deal_id } => {
            let entries: Vec<HistoryEntry> = client
                .get(&format!("/api/v1/deals/{}/history", deal_id))
                .await?;
            let stages = stages_for_display(client).await;
            output::print_history(&entries, &stages, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("1250").unwrap(), 125_000);
        assert_eq!(parse_cents("1250.5").unwrap(), 125_050);
        assert_eq!(parse_cents("0.07").unwrap(), 7);
        assert!(parse_cents("1.234").is_err());
        assert!(parse_cents("-3").is_err());
        assert!(parse_cents("abc").is_err());
    }
}
