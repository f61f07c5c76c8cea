// In-memory collaborators for unit tests

use super::{Dashboard, JobQuery, JobResultPost, OpenQaJob, Orchestrator, RepoMetadata};
use crate::errors::ClientError;
use crate::models::{
    Channel, DashboardIncident, JobComment, JobResult, JobSettingRecord, SettingsKind,
    StoredAggregateSetting, StoredIncidentSetting,
};
use crate::payload::{Payload, FLAVOR};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn status(status: u16) -> ClientError {
    ClientError::Status {
        url: "http://fake/".to_string(),
        status,
        body: String::new(),
    }
}

pub fn dashboard_incident(number: u64, request: Option<u64>, channels: &[&str]) -> DashboardIncident {
    DashboardIncident {
        number,
        rr_number: request,
        project: format!("SUSE:Maintenance:{}", number),
        in_review: true,
        in_review_qam: true,
        is_active: true,
        approved: false,
        emu: false,
        packages: vec!["foo".to_string()],
        channels: channels.iter().map(|c| c.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct FakeDashboard {
    pub incidents: Vec<DashboardIncident>,
    pub incident_settings: HashMap<u64, Vec<StoredIncidentSetting>>,
    pub aggregate_settings: HashMap<u64, Vec<StoredAggregateSetting>>,
    pub latest: HashMap<(String, String), StoredAggregateSetting>,
    pub results: HashMap<(SettingsKind, u64), Vec<JobResult>>,
    /// Status answered instead of results
    pub result_errors: HashMap<(SettingsKind, u64), u16>,
    pub stored_settings: Mutex<Vec<JobSettingRecord>>,
    pub stored_results: Mutex<Vec<JobResultPost>>,
    pub result_calls: AtomicUsize,
}

impl FakeDashboard {
    pub fn stored_settings(&self) -> Vec<JobSettingRecord> {
        self.stored_settings.lock().unwrap().clone()
    }

    pub fn stored_results(&self) -> Vec<JobResultPost> {
        self.stored_results.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dashboard for FakeDashboard {
    async fn incidents(&self) -> Result<Vec<DashboardIncident>, ClientError> {
        Ok(self.incidents.clone())
    }

    async fn incident(&self, id: u64) -> Result<DashboardIncident, ClientError> {
        self.incidents
            .iter()
            .find(|i| i.number == id)
            .cloned()
            .ok_or_else(|| status(404))
    }

    async fn incident_settings(
        &self,
        incident: u64,
    ) -> Result<Vec<StoredIncidentSetting>, ClientError> {
        Ok(self.incident_settings.get(&incident).cloned().unwrap_or_default())
    }

    async fn aggregate_settings(
        &self,
        incident: u64,
    ) -> Result<Vec<StoredAggregateSetting>, ClientError> {
        Ok(self.aggregate_settings.get(&incident).cloned().unwrap_or_default())
    }

    async fn latest_aggregate(
        &self,
        product: &str,
        arch: &str,
    ) -> Result<Option<StoredAggregateSetting>, ClientError> {
        Ok(self.latest.get(&(product.to_string(), arch.to_string())).cloned())
    }

    async fn job_results(
        &self,
        kind: SettingsKind,
        settings_id: u64,
    ) -> Result<Vec<JobResult>, ClientError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.result_errors.get(&(kind, settings_id)) {
            return Err(status(*code));
        }
        Ok(self.results.get(&(kind, settings_id)).cloned().unwrap_or_default())
    }

    async fn put_job_setting(&self, record: &JobSettingRecord) -> Result<Option<u64>, ClientError> {
        let mut stored = self.stored_settings.lock().unwrap();
        stored.push(record.clone());
        Ok(Some(stored.len() as u64))
    }

    async fn put_job_result(&self, result: &JobResultPost) -> Result<(), ClientError> {
        self.stored_results.lock().unwrap().push(result.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOrchestrator {
    pub comments: HashMap<u64, Vec<JobComment>>,
    /// Jobs listed per build
    pub jobs: HashMap<String, Vec<OpenQaJob>>,
    pub devel_groups: HashSet<u64>,
    /// Flavors whose triggers are refused
    pub failing_flavors: HashSet<String>,
    pub triggered: Mutex<Vec<Payload>>,
    pub comment_calls: AtomicUsize,
    pub devel_calls: AtomicUsize,
}

impl FakeOrchestrator {
    pub fn comment(&mut self, job_id: u64, text: &str) {
        self.comments.entry(job_id).or_default().push(JobComment {
            id: job_id * 10,
            text: text.to_string(),
        });
    }

    pub fn triggered(&self) -> Vec<Payload> {
        self.triggered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn trigger(&self, payload: &Payload) -> Result<(), ClientError> {
        if payload
            .get(FLAVOR)
            .is_some_and(|flavor| self.failing_flavors.contains(flavor))
        {
            return Err(status(400));
        }
        self.triggered.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn job_comments(&self, job_id: u64) -> Result<Vec<JobComment>, ClientError> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.comments.get(&job_id).cloned().unwrap_or_default())
    }

    async fn is_devel_group(&self, group_id: u64) -> Result<bool, ClientError> {
        self.devel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devel_groups.contains(&group_id))
    }

    async fn jobs(&self, query: &JobQuery) -> Result<Vec<OpenQaJob>, ClientError> {
        Ok(self.jobs.get(&query.build).cloned().unwrap_or_default())
    }

    fn job_url(&self, job_id: u64) -> String {
        format!("http://openqa/t{}", job_id)
    }
}

/// Repository metadata keyed by incident and channel
#[derive(Default)]
pub struct FakeRepo {
    pub revisions: HashMap<(u64, Channel), String>,
}

#[async_trait]
impl RepoMetadata for FakeRepo {
    async fn revision(&self, incident: u64, channel: &Channel) -> Result<String, ClientError> {
        self.revisions
            .get(&(incident, channel.clone()))
            .cloned()
            .ok_or_else(|| status(404))
    }
}
