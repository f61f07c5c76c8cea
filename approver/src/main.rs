// Approver binary entry point: accept reviews of incidents with clean results

use anyhow::{Context, Result};
use clap::Parser;
use common::approver::{ApprovalCaches, Approver, ApproverConfig};
use common::bootstrap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "approver")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Approve maintenance incidents whose openQA results are clean", long_about = None)]
struct Cli {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Decide without accepting any review
    #[arg(long)]
    dry: bool,

    /// Only judge this incident
    #[arg(long)]
    incident: Option<u64>,

    /// Judge results of every submission, not only the newest one
    #[arg(long)]
    all_incidents: bool,
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = bootstrap::init(&cli.config_dir)?;
    info!(dry = cli.dry, incident = ?cli.incident, "Starting approver run");

    let clients = bootstrap::init_collaborators(&settings)?;
    let approver = Approver::new(
        ApproverConfig {
            dry: cli.dry,
            incident: cli.incident,
            all_incidents: cli.all_incidents,
            review_group: settings.review.group.clone(),
            maintenance_project: settings.review.maintenance_project.clone(),
            dashboard_url: settings.dashboard.url.clone(),
        },
        clients.dashboard,
        clients.openqa,
        clients.review,
        ApprovalCaches::default(),
    );

    let summary = approver
        .run()
        .await
        .context("Failed to read incidents from the dashboard")?;
    Ok(ExitCode::from(summary.exit_code()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Approver run failed");
            eprintln!("approver: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
