use anyhow::Result;
use clap::Args;
use console::style;

use super::{load_config, print_header, with_reconciler, GlobalArgs};

/// Show applied, pending and drifted migrations.
#[derive(Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;

        print_header("Migration Status");

        let status = with_reconciler(&config, |mut reconciler| {
            Box::pin(async move { reconciler.status().await.map_err(anyhow::Error::from) })
        })
        .await?;

        if status.applied.is_empty() && status.pending.is_empty() {
            println!("  {} No migrations found", style("ℹ").blue());
            println!();
            return Ok(());
        }

        if !status.applied.is_empty() {
            println!("  {} Applied:", style("✓").green());
            for m in &status.applied {
                let installed = m
                    .installed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "    {:>4} {} {} ({})",
                    style(m.install_order.unwrap_or_default()).dim(),
                    style(format!("V{}", m.version)).cyan(),
                    m.description,
                    style(installed).dim()
                );
            }
        }

        if !status.pending.is_empty() {
            println!();
            println!("  {} Pending:", style("○").yellow());
            for m in &status.pending {
                println!("    {} {}", style("→").dim(), style(m).yellow());
            }
        }

        if !status.skipped.is_empty() {
            println!();
            println!(
                "  {} Below the last applied version, never recorded:",
                style("!").yellow()
            );
            for m in &status.skipped {
                println!("    {} {}", style("-").dim(), m);
            }
        }

        if !status.drift.is_empty() {
            println!();
            println!("  {} Checksum mismatch:", style("✗").red());
            for d in &status.drift {
                println!(
                    "    {} V{} recorded {} but {} has {}",
                    style("!").red(),
                    d.version,
                    d.stored,
                    d.script,
                    d.candidate
                );
            }
        }

        println!();
        println!(
            "  {} {} applied, {} pending",
            style("ℹ").blue(),
            status.applied.len(),
            status.pending.len()
        );
        println!();

        Ok(())
    }
}
