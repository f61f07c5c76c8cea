// Scheduler binary entry point: one scheduling batch run

use anyhow::{Context, Result};
use clap::Parser;
use common::bootstrap;
use common::product::{load_metadata, load_single_arch};
use common::scheduler::{SchedulerConfig, SchedulerEngine};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trigger openQA test jobs for maintenance incidents and aggregates", long_about = None)]
struct Cli {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Directory with product metadata YAML files
    #[arg(long, default_value = "metadata")]
    configs: PathBuf,

    /// YAML list of packages built for one arch only
    #[arg(long)]
    singlearch: Option<PathBuf>,

    /// Log triggers without posting them
    #[arg(long)]
    dry: bool,

    /// Schedule again even if already scheduled with the same revisions
    #[arg(long)]
    ignore_onetime: bool,

    #[arg(long)]
    disable_aggregates: bool,

    #[arg(long)]
    disable_incidents: bool,

    /// URL of the CI job running this batch
    #[arg(long, env = "CI_JOB_URL")]
    ci_job_url: Option<String>,
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = bootstrap::init(&cli.config_dir)?;
    info!(dry = cli.dry, configs = %cli.configs.display(), "Starting scheduler run");

    let single_arch = cli
        .singlearch
        .as_deref()
        .map(load_single_arch)
        .unwrap_or_else(BTreeSet::new);
    let configs = load_metadata(
        &cli.configs,
        cli.disable_aggregates,
        cli.disable_incidents,
        &single_arch,
    );
    info!(config_count = configs.len(), "Product metadata loaded");

    let clients = bootstrap::init_collaborators(&settings)?;
    let engine = SchedulerEngine::new(
        SchedulerConfig {
            dry: cli.dry,
            ignore_onetime: cli.ignore_onetime,
            ci_url: cli.ci_job_url,
            repositories: settings.repositories.clone(),
        },
        clients.dashboard,
        clients.openqa,
        clients.repo,
        clients.images,
    );

    let summary = engine
        .run(&configs)
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
            error!(error = %format!("{:#}", e), "Scheduler run failed");
            eprintln!("scheduler: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
