// Dashboard client: incidents, job settings and job results

use super::{endpoint, Dashboard, HttpClient, JobResultPost};
use crate::errors::ClientError;
use crate::models::{
    DashboardIncident, JobResult, JobSettingRecord, SettingsKind, StoredAggregateSetting,
    StoredIncidentSetting,
};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument};

#[derive(Debug, Deserialize)]
struct PutResponse {
    #[serde(default)]
    id: Option<u64>,
}

/// HTTP client for the dashboard persistence API
pub struct DashboardClient {
    http: HttpClient,
    base_url: String,
    token: String,
}

impl DashboardClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("Token {}", self.token))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = endpoint(&self.base_url, path);
        self.http
            .json(&url, || self.authorized(self.http.inner().get(&url)))
            .await
    }

    /// GET a list where 404 means "nothing stored yet"
    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ClientError> {
        match self.get::<Vec<T>>(path).await {
            Err(e) if e.status() == Some(404) => {
                debug!(path = path, "Nothing stored in dashboard");
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Dashboard for DashboardClient {
    #[instrument(skip(self))]
    async fn incidents(&self) -> Result<Vec<DashboardIncident>, ClientError> {
        let incidents: Vec<DashboardIncident> = self.get("api/incidents").await?;
        info!(count = incidents.len(), "Incidents loaded from dashboard");
        Ok(incidents)
    }

    async fn incident(&self, id: u64) -> Result<DashboardIncident, ClientError> {
        self.get(&format!("api/incidents/{}", id)).await
    }

    async fn incident_settings(
        &self,
        incident: u64,
    ) -> Result<Vec<StoredIncidentSetting>, ClientError> {
        self.get_list(&format!("{}/{}", SettingsKind::Incident.settings_api(), incident))
            .await
    }

    async fn aggregate_settings(
        &self,
        incident: u64,
    ) -> Result<Vec<StoredAggregateSetting>, ClientError> {
        self.get_list(&format!("{}/{}", SettingsKind::Aggregate.settings_api(), incident))
            .await
    }

    async fn latest_aggregate(
        &self,
        product: &str,
        arch: &str,
    ) -> Result<Option<StoredAggregateSetting>, ClientError> {
        let url = endpoint(&self.base_url, SettingsKind::Aggregate.settings_api());
        let settings: Vec<StoredAggregateSetting> = self
            .http
            .json(&url, || {
                self.authorized(
                    self.http
                        .inner()
                        .get(&url)
                        .query(&[("product", product), ("arch", arch)]),
                )
            })
            .await?;
        // newest first
        Ok(settings.into_iter().next())
    }

    async fn job_results(
        &self,
        kind: SettingsKind,
        settings_id: u64,
    ) -> Result<Vec<JobResult>, ClientError> {
        self.get_list(&format!("{}/{}", kind.results_api(), settings_id))
            .await
    }

    #[instrument(skip(self, record), fields(kind = %record.kind()))]
    async fn put_job_setting(&self, record: &JobSettingRecord) -> Result<Option<u64>, ClientError> {
        let url = endpoint(&self.base_url, record.kind().settings_api());
        let response: PutResponse = self
            .http
            .json(&url, || self.authorized(self.http.inner().put(&url).json(record)))
            .await?;
        info!(id = ?response.id, "Job setting stored in dashboard");
        Ok(response.id)
    }

    async fn put_job_result(&self, result: &JobResultPost) -> Result<(), ClientError> {
        let url = endpoint(&self.base_url, "api/jobs");
        self.http
            .send(&url, || self.authorized(self.http.inner().put(&url).json(result)))
            .await?;
        Ok(())
    }
}
