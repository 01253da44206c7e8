use anyhow::Result;
use clap::Args;
use console::style;

use sqlversioner_core::store::InitOutcome;

use super::{load_config, print_header, with_reconciler, GlobalArgs};

/// Create the migration history table.
#[derive(Args)]
pub struct InitCommand {}

impl InitCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;

        print_header("Initialize");

        let outcome = with_reconciler(&config, |mut reconciler| {
            Box::pin(async move { reconciler.initialize().await.map_err(anyhow::Error::from) })
        })
        .await?;

        match outcome {
            InitOutcome::Created => println!(
                "  {} Created history table {}. Ready to migrate.",
                style("✓").green(),
                style(&config.database.history_table).cyan()
            ),
            InitOutcome::AlreadyInitialized => println!(
                "  {} History table {} already exists, skipping initialization",
                style("ℹ").blue(),
                style(&config.database.history_table).cyan()
            ),
        }
        println!();

        Ok(())
    }
}
