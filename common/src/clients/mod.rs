// Collaborator contracts and their HTTP implementations

#[cfg(test)]
pub(crate) mod fakes;
pub mod dashboard;
pub mod http;
pub mod images;
pub mod obs;
pub mod openqa;
pub mod repo;

pub use dashboard::DashboardClient;
pub use http::HttpClient;
pub use images::ImageClient;
pub use obs::ObsClient;
pub use openqa::OpenQaClient;
pub use repo::RepoClient;

use crate::errors::ClientError;
use crate::models::{
    Channel, DashboardIncident, JobComment, JobResult, JobSettingRecord, JobStatus,
    SettingsKind, StoredAggregateSetting, StoredIncidentSetting,
};
use crate::payload::Payload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dashboard persistence API
#[async_trait]
pub trait Dashboard: Send + Sync {
    /// Active incidents known to the dashboard
    async fn incidents(&self) -> Result<Vec<DashboardIncident>, ClientError>;

    async fn incident(&self, id: u64) -> Result<DashboardIncident, ClientError>;

    /// Incident-kind job settings of one incident; empty when none were stored
    async fn incident_settings(&self, incident: u64)
        -> Result<Vec<StoredIncidentSetting>, ClientError>;

    /// Aggregate-kind job settings covering one incident
    async fn aggregate_settings(
        &self,
        incident: u64,
    ) -> Result<Vec<StoredAggregateSetting>, ClientError>;

    /// Newest aggregate setting stored for a product and arch
    async fn latest_aggregate(
        &self,
        product: &str,
        arch: &str,
    ) -> Result<Option<StoredAggregateSetting>, ClientError>;

    /// Latest run results recorded for one job setting
    async fn job_results(
        &self,
        kind: SettingsKind,
        settings_id: u64,
    ) -> Result<Vec<JobResult>, ClientError>;

    /// Store a job setting; returns the dashboard id when reported
    async fn put_job_setting(&self, record: &JobSettingRecord) -> Result<Option<u64>, ClientError>;

    async fn put_job_result(&self, result: &JobResultPost) -> Result<(), ClientError>;
}

/// Test orchestrator API
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Trigger the jobs described by a flat payload
    async fn trigger(&self, payload: &Payload) -> Result<(), ClientError>;

    async fn job_comments(&self, job_id: u64) -> Result<Vec<JobComment>, ClientError>;

    /// Whether a job group lives below the development parent group
    async fn is_devel_group(&self, group_id: u64) -> Result<bool, ClientError>;

    /// Latest relevant jobs of one build
    async fn jobs(&self, query: &JobQuery) -> Result<Vec<OpenQaJob>, ClientError>;

    /// Browser URL of a job, for logs
    fn job_url(&self, job_id: u64) -> String;
}

/// Review system API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewSystem: Send + Sync {
    /// Accept the review of `request` on behalf of `group`
    async fn accept_review(
        &self,
        request: u64,
        group: &str,
        message: &str,
    ) -> Result<(), ClientError>;
}

/// Published repository metadata
#[async_trait]
pub trait RepoMetadata: Send + Sync {
    /// Revision of one channel of one incident
    async fn revision(&self, incident: u64, channel: &Channel) -> Result<String, ClientError>;
}

/// Lookups behind the dynamic image directives
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Build results of the group overview behind a tools-image query
    async fn tools_builds(&self, query_url: &str) -> Result<Vec<ToolsBuild>, ClientError>;

    /// Names listed in the configured image index
    async fn image_index(&self) -> Result<Vec<String>, ClientError>;

    /// PINT images of one state (`active`, `inactive`, `deprecated`)
    async fn pint_images(&self, query_url: &str, state: &str)
        -> Result<Vec<PintImage>, ClientError>;
}

/// Build result summary of a tools-image group overview
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolsBuild {
    pub build: String,
    #[serde(default)]
    pub failed: u64,
}

/// Cloud image as listed by PINT
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PintImage {
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub publishedon: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl PintImage {
    /// Stringified value of a named image field
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "name" => Some(self.name.clone()),
            "state" => Some(self.state.clone()),
            "publishedon" => Some(self.publishedon.clone()),
            "region" => self.region.clone(),
            _ => match self.fields.get(name)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            },
        }
    }
}

/// Query for the latest relevant jobs of one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobQuery {
    pub distri: String,
    pub version: String,
    pub flavor: String,
    pub arch: String,
    pub build: String,
}

/// A job as listed by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpenQaJob {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub group_id: Option<u64>,
    #[serde(default)]
    pub clone_id: Option<u64>,
    #[serde(default)]
    pub result: String,
}

/// A job result as stored in the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResultPost {
    pub job_id: u64,
    pub incident_settings: Option<u64>,
    pub update_settings: Option<u64>,
    pub name: String,
    pub distri: String,
    pub group_id: u64,
    pub job_group: String,
    pub version: String,
    pub arch: String,
    pub flavor: String,
    pub build: String,
    pub status: JobStatus,
}

/// Join a base URL and a relative API path
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_with_single_slash() {
        assert_eq!(endpoint("http://dash/", "api/incidents"), "http://dash/api/incidents");
        assert_eq!(endpoint("http://dash", "/api/incidents"), "http://dash/api/incidents");
    }

    #[test]
    fn test_pint_field_lookup() {
        let image: PintImage = serde_json::from_value(serde_json::json!({
            "name": "suse-sles-15-sp4-v20240101-hvm-ssd-x86_64",
            "state": "active",
            "publishedon": "20240101",
            "id": "ami-0123",
            "region": "eu-central-1"
        }))
        .unwrap();
        assert_eq!(image.field("id").as_deref(), Some("ami-0123"));
        assert_eq!(image.field("region").as_deref(), Some("eu-central-1"));
        assert_eq!(image.field("missing"), None);
    }
}
