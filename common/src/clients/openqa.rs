// openQA client with API key / HMAC request signing

use super::{endpoint, HttpClient, JobQuery, OpenQaJob, Orchestrator};
use crate::errors::ClientError;
use crate::models::JobComment;
use crate::payload::Payload;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use sha1::Sha1;
use tracing::{info, instrument};

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<OpenQaJob>,
}

#[derive(Debug, Deserialize)]
struct JobGroup {
    #[serde(default)]
    parent_id: Option<u64>,
}

/// HTTP client for the openQA API
pub struct OpenQaClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    api_secret: String,
    devel_parent_group_id: u64,
}

impl OpenQaClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        devel_parent_group_id: u64,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            devel_parent_group_id,
        }
    }

    fn parse_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ClientError> {
        let raw = endpoint(&self.base_url, path);
        let parsed = if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query)
        };
        parsed.map_err(|e| ClientError::Setup(format!("Invalid openQA URL {}: {}", raw, e)))
    }

    /// Attach the openQA authentication headers for one request
    fn signed(&self, request: RequestBuilder, url: &Url) -> RequestBuilder {
        if self.api_key.is_empty() {
            return request;
        }
        let microtime = Utc::now().timestamp().to_string();
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        request
            .header("Accept", "application/json")
            .header("X-API-Key", &self.api_key)
            .header("X-API-Microtime", &microtime)
            .header("X-API-Hash", sign(&self.api_secret, &path, &microtime))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let url = self.parse_url(path, query)?;
        let display = url.to_string();
        self.http
            .json(&display, || self.signed(self.http.inner().get(url.clone()), &url))
            .await
    }
}

/// HMAC-SHA1 hex digest of `path` + `microtime`
pub(crate) fn sign(secret: &str, path: &str, microtime: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(path.as_bytes());
    mac.update(microtime.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl Orchestrator for OpenQaClient {
    #[instrument(skip(self, payload), fields(flavor = payload.get("FLAVOR"), arch = payload.get("ARCH")))]
    async fn trigger(&self, payload: &Payload) -> Result<(), ClientError> {
        let url = self.parse_url("api/v1/isos", &[])?;
        let display = url.to_string();
        self.http
            .send(&display, || {
                self.signed(
                    self.http.inner().post(url.clone()).form(payload.as_map()),
                    &url,
                )
            })
            .await?;
        info!("Jobs triggered in openQA");
        Ok(())
    }

    async fn job_comments(&self, job_id: u64) -> Result<Vec<JobComment>, ClientError> {
        self.get(&format!("api/v1/jobs/{}/comments", job_id), &[])
            .await
    }

    async fn is_devel_group(&self, group_id: u64) -> Result<bool, ClientError> {
        let groups: Vec<JobGroup> = self
            .get(&format!("api/v1/job_groups/{}", group_id), &[])
            .await?;
        Ok(groups
            .first()
            .and_then(|group| group.parent_id)
            .is_some_and(|parent| parent == self.devel_parent_group_id))
    }

    async fn jobs(&self, query: &JobQuery) -> Result<Vec<OpenQaJob>, ClientError> {
        let params = [
            ("scope", "relevant"),
            ("latest", "1"),
            ("distri", query.distri.as_str()),
            ("version", query.version.as_str()),
            ("flavor", query.flavor.as_str()),
            ("arch", query.arch.as_str()),
            ("build", query.build.as_str()),
        ];
        let list: JobList = self.get("api/v1/jobs", &params).await?;
        Ok(list.jobs)
    }

    fn job_url(&self, job_id: u64) -> String {
        endpoint(&self.base_url, &format!("t{}", job_id))
    }
}
