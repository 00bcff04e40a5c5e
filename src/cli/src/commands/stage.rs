//! Pipeline stage commands.

use anyhow::Result;
use clap::Subcommand;

use super::StageInfo;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum StageCommands {
    /// List the active stages of the default pipeline
    List,
}

pub async fn execute(cmd: StageCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        StageCommands::List => {
            let stages: Vec<StageInfo> = client.get("/api/v1/stages").await?;
            output::print_stages(&stages, format);
        }
    }

    Ok(())
}
