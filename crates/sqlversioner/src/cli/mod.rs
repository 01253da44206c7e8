mod init;
mod migrate;
mod status;

pub use init::InitCommand;
pub use migrate::MigrateCommand;
pub use status::StatusCommand;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use console::style;
use tracing::warn;

use sqlversioner_core::config::VersionerConfig;
use sqlversioner_core::store::HistoryStore;
use sqlversioner_runtime::{Reconciler, ScriptRepository};

/// sqlversioner - versioned SQL migrations, applied exactly once.
#[derive(Parser)]
#[command(name = "sqlversioner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// Configuration file path (.yml, .yaml or .toml).
    #[arg(short, long, default_value = "config.yml", global = true)]
    pub config: PathBuf,

    /// Migrations directory (overrides the config file).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create the migration history table.
    Init(InitCommand),

    /// Apply pending migrations.
    Migrate(MigrateCommand),

    /// Show applied, pending and drifted migrations.
    Status(StatusCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.global.verbose);

        // Load .env if present
        dotenvy::dotenv().ok();

        match self.command {
            Commands::Init(cmd) => cmd.execute(&self.global).await,
            Commands::Migrate(cmd) => cmd.execute(&self.global).await,
            Commands::Status(cmd) => cmd.execute(&self.global).await,
        }
    }
}

fn init_tracing(verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration, applying command-line overrides.
fn load_config(global: &GlobalArgs) -> Result<VersionerConfig> {
    if !global.config.exists() {
        anyhow::bail!(
            "Configuration file not found: {}",
            global.config.display()
        );
    }

    let mut config = VersionerConfig::from_file(&global.config)?;
    if let Some(dir) = &global.migrations_dir {
        config.migrations.path = dir.clone();
    }
    Ok(config)
}

/// Future borrowing the reconciler's store.
type RunFuture<'s, T> = Pin<Box<dyn Future<Output = Result<T>> + 's>>;

/// Connect, run `f` against a reconciler, then release the connection.
async fn with_reconciler<T, F>(config: &VersionerConfig, f: F) -> Result<T>
where
    F: for<'s> FnOnce(Reconciler<'s>) -> RunFuture<'s, T>,
{
    let store = sqlversioner_runtime::connect(&config.database).await?;
    let repository = ScriptRepository::new(&config.migrations.path);
    run_and_close(store, repository, f).await
}

/// Run `f` against `store`. The store is closed whatever `f` returns.
async fn run_and_close<T, F>(
    mut store: Box<dyn HistoryStore>,
    repository: ScriptRepository,
    f: F,
) -> Result<T>
where
    F: for<'s> FnOnce(Reconciler<'s>) -> RunFuture<'s, T>,
{
    let result = f(Reconciler::new(store.as_mut(), repository)).await;

    if let Err(e) = store.close().await {
        warn!("Failed to close database connection: {}", e);
    }

    result
}

fn print_header(title: &str) {
    println!();
    println!(
        "  {}  {}",
        style("sqlversioner").bold().cyan(),
        style(title).bold()
    );
    println!();
}

fn display_dir(path: &Path) -> String {
    path.display().to_string()
}
