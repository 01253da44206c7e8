use anyhow::Result;
use clap::Args;
use console::style;

use sqlversioner_runtime::RunOutcome;

use super::{display_dir, load_config, print_header, with_reconciler, GlobalArgs};

/// Apply pending migrations.
#[derive(Args)]
pub struct MigrateCommand {
    /// List what would be applied without changing the database.
    #[arg(long)]
    pub dry_run: bool,
}

impl MigrateCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let migrations_dir = display_dir(&config.migrations.path);

        print_header("Migrations");

        if self.dry_run {
            let status = with_reconciler(&config, |mut reconciler| {
                Box::pin(async move { reconciler.status().await.map_err(anyhow::Error::from) })
            })
            .await?;

            if let Some(drift) = status.drift.first() {
                anyhow::bail!(
                    "Checksum mismatch for migration {}: recorded {}, script has {}",
                    drift.version,
                    drift.stored,
                    drift.candidate
                );
            }
            if status.pending.is_empty() {
                println!("  {} Database is up to date", style("ℹ").blue());
            } else {
                println!("  {} Would apply:", style("○").yellow());
                for m in &status.pending {
                    println!("    {} {}", style("→").dim(), style(m).yellow());
                }
            }
            println!();
            return Ok(());
        }

        println!(
            "  {} Running pending migrations from {}...",
            style("→").dim(),
            migrations_dir
        );

        let report = with_reconciler(&config, |mut reconciler| {
            Box::pin(async move { reconciler.migrate().await.map_err(anyhow::Error::from) })
        })
        .await?;

        for m in &report.applied {
            println!("  {} Applied {}", style("✓").green(), style(m).cyan());
        }

        match report.outcome {
            RunOutcome::UpToDate => {
                println!("  {} Database is up to date", style("ℹ").blue());
            }
            RunOutcome::Completed => {
                println!();
                println!(
                    "  {} {} migration(s) applied",
                    style("✓").green(),
                    report.applied.len()
                );
            }
            RunOutcome::Failed { version, error } => {
                println!(
                    "  {} Migration {} failed, remaining migrations skipped",
                    style("✗").red(),
                    style(&version).red()
                );
                println!();
                return Err(anyhow::Error::from(error)
                    .context(format!("Migration with version {} failed", version)));
            }
        }
        println!();

        Ok(())
    }
}
