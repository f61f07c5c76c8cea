// Bootstrap utilities for binary initialization
// Shared by the scheduler, approver and syncres binaries

use crate::clients::{
    DashboardClient, HttpClient, ImageClient, ObsClient, OpenQaClient, RepoClient,
};
use crate::config::Settings;
use crate::telemetry;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Load and validate settings, then initialize logging from them
///
/// # Errors
/// Returns error if the configuration cannot be read, is invalid, or logging
/// was already initialized
pub fn init(config_dir: &Path) -> Result<Settings> {
    let settings = Settings::load_from_path(config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(&settings.observability.log_level, settings.observability.json)
        .context("Failed to initialize logging")?;
    Ok(settings)
}

/// HTTP collaborators configured from the application settings
pub struct Collaborators {
    pub dashboard: Arc<DashboardClient>,
    pub openqa: Arc<OpenQaClient>,
    pub review: Arc<ObsClient>,
    pub repo: Arc<RepoClient>,
    pub images: Arc<ImageClient>,
}

/// Build every collaborator client over one shared HTTP client
///
/// # Errors
/// Returns error if the HTTP client cannot be created
#[tracing::instrument(skip(settings))]
pub fn init_collaborators(settings: &Settings) -> Result<Collaborators> {
    let http = HttpClient::new(&settings.http).context("Failed to initialize HTTP client")?;

    let collaborators = Collaborators {
        dashboard: Arc::new(DashboardClient::new(
            http.clone(),
            settings.dashboard.url.clone(),
            settings.dashboard.token.clone(),
        )),
        openqa: Arc::new(OpenQaClient::new(
            http.clone(),
            settings.openqa.url.clone(),
            settings.openqa.api_key.clone(),
            settings.openqa.api_secret.clone(),
            settings.openqa.devel_parent_group_id,
        )),
        review: Arc::new(ObsClient::new(
            http.clone(),
            settings.review.url.clone(),
            settings.review.user.clone(),
            settings.review.password.clone(),
        )),
        repo: Arc::new(RepoClient::new(
            http.clone(),
            settings.repositories.download_base.clone(),
        )),
        images: Arc::new(ImageClient::new(http, settings.images.index_url.clone())),
    };

    info!(
        dashboard = %settings.dashboard.url,
        openqa = %settings.openqa.url,
        review = %settings.review.url,
        "Collaborators initialized"
    );
    Ok(collaborators)
}
