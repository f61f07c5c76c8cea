// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub dashboard: DashboardConfig,
    pub openqa: OpenQaConfig,
    pub review: ReviewConfig,
    pub repositories: RepositoryConfig,
    #[serde(default)]
    pub images: ImageConfig,
    pub http: HttpConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenQaConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Parent job group holding development groups
    #[serde(default = "default_devel_parent_group_id")]
    pub devel_parent_group_id: u64,
}

fn default_devel_parent_group_id() -> u64 {
    9
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub group: String,
    pub maintenance_project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub download_base: String,
    pub smelt_incident_url: String,
    pub dashboard_incident_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    /// JSON listing searched by PUBLIC_CLOUD_IMAGE_REGEX
    pub index_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let defaults = Config::try_from(&Settings::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.dashboard.url.is_empty() {
            return Err("Dashboard URL cannot be empty".to_string());
        }
        if self.openqa.url.is_empty() {
            return Err("openQA URL cannot be empty".to_string());
        }
        if self.review.url.is_empty() {
            return Err("Review system URL cannot be empty".to_string());
        }
        if self.review.group.is_empty() {
            return Err("Review group cannot be empty".to_string());
        }
        if self.repositories.download_base.is_empty() {
            return Err("Repository download_base cannot be empty".to_string());
        }
        if self.http.timeout_seconds == 0 {
            return Err("HTTP timeout_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dashboard: DashboardConfig {
                url: "http://dashboard.qam.suse.de/".to_string(),
                token: String::new(),
            },
            openqa: OpenQaConfig {
                url: "https://openqa.suse.de".to_string(),
                api_key: String::new(),
                api_secret: String::new(),
                devel_parent_group_id: default_devel_parent_group_id(),
            },
            review: ReviewConfig {
                url: "https://api.suse.de".to_string(),
                user: String::new(),
                password: String::new(),
                group: "qam-openqa".to_string(),
                maintenance_project: "SUSE:Maintenance".to_string(),
            },
            repositories: RepositoryConfig {
                download_base: "http://download.suse.de/ibs/SUSE:/Maintenance:/".to_string(),
                smelt_incident_url: "https://smelt.suse.de/incident/".to_string(),
                dashboard_incident_url: "https://dashboard.qam.suse.de/incident/".to_string(),
            },
            images: ImageConfig::default(),
            http: HttpConfig {
                timeout_seconds: 30,
                max_retries: 3,
                base_delay_ms: 500,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
        }
    }
}
