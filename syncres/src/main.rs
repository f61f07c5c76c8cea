// Syncres binary entry point: copy openQA results into the dashboard

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::bootstrap;
use common::product::read_products;
use common::syncres::ResultSync;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "syncres")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync openQA job results into the QEM dashboard", long_about = None)]
struct Cli {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config", global = true)]
    config_dir: PathBuf,

    /// Directory with product metadata YAML files
    #[arg(long, default_value = "metadata", global = true)]
    configs: PathBuf,

    /// Read results without writing to the dashboard
    #[arg(long, global = true)]
    dry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync results of incident job settings
    Incidents,
    /// Sync results of the newest aggregate builds
    Aggregates,
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = bootstrap::init(&cli.config_dir)?;
    info!(dry = cli.dry, command = ?cli.command, "Starting result sync");

    let clients = bootstrap::init_collaborators(&settings)?;
    let sync = ResultSync::new(cli.dry, clients.dashboard, clients.openqa);

    let targets = match cli.command {
        Commands::Incidents => sync
            .incident_targets()
            .await
            .context("Failed to read incidents from the dashboard")?,
        Commands::Aggregates => {
            let products = read_products(&cli.configs);
            info!(product_count = products.len(), "Aggregate products loaded");
            sync.aggregate_targets(&products).await
        }
    };

    let summary = sync.run(&targets).await;
    Ok(ExitCode::from(summary.exit_code()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Result sync failed");
            eprintln!("syncres: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
