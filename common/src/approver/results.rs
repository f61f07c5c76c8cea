// Judge job groups by their latest results and reviewer comments

use crate::cache::RunCache;
use crate::clients::{Dashboard, Orchestrator};
use crate::errors::ApprovalError;
use crate::models::{JobGroup, JobStatus, SettingsKind};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether a comment marks a failed job acceptable for `incident`
///
/// The marker must open the comment and carry a reason.
pub fn acceptable_comment(text: &str, incident: u64) -> bool {
    let marker = format!("@review:acceptable_for:incident_{}:", incident);
    text.strip_prefix(marker.as_str())
        .and_then(|reason| reason.chars().next())
        .is_some_and(|first| first != '\n')
}

/// Read-through caches of one approval run
#[derive(Default)]
pub struct ApprovalCaches {
    /// (settings id, kind, incident) → whether the group passed
    pub groups: RunCache<(u64, SettingsKind, u64), bool>,
    /// (job id, incident) → whether a reviewer accepted the job
    pub comments: RunCache<(u64, u64), bool>,
}

pub struct ResultJudge {
    dashboard: Arc<dyn Dashboard>,
    orchestrator: Arc<dyn Orchestrator>,
    caches: ApprovalCaches,
}

impl ResultJudge {
    pub fn new(
        dashboard: Arc<dyn Dashboard>,
        orchestrator: Arc<dyn Orchestrator>,
        caches: ApprovalCaches,
    ) -> Self {
        Self {
            dashboard,
            orchestrator,
            caches,
        }
    }

    async fn job_acceptable(&self, job_id: u64, incident: u64) -> bool {
        let lookup = self
            .caches
            .comments
            .get_or_try_insert((job_id, incident), || async move {
                let accepted = match self.orchestrator.job_comments(job_id).await {
                    Ok(comments) => comments
                        .iter()
                        .any(|comment| acceptable_comment(&comment.text, incident)),
                    Err(e) => {
                        debug!(job_id, error = %e, "Cannot read job comments");
                        false
                    }
                };
                Ok::<_, Infallible>(accepted)
            })
            .await;
        lookup.unwrap_or(false)
    }

    async fn fetch_group(&self, group: JobGroup, incident: u64) -> Result<bool, ApprovalError> {
        let no_results = || ApprovalError::NoResults {
            settings_id: group.settings_id,
            incident,
        };

        let results = match self.dashboard.job_results(group.kind, group.settings_id).await {
            Ok(results) => results,
            Err(e) if e.is_retryable() => {
                info!(settings_id = group.settings_id, error = %e, "Results unavailable");
                return Err(no_results());
            }
            Err(e) => {
                warn!(settings_id = group.settings_id, error = %e, "Cannot read results, group failed");
                return Ok(false);
            }
        };
        if results.is_empty() {
            return Err(no_results());
        }

        for result in &results {
            if result.status == JobStatus::Passed {
                continue;
            }
            let url = self.orchestrator.job_url(result.job_id);
            if self.job_acceptable(result.job_id, incident).await {
                info!(incident, job = %url, "Ignoring failed job due to openQA comment");
            } else {
                info!(incident, job = %url, "Found failed, not-ignored job");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether every run of one group passed for `incident`
    ///
    /// A group without results is inconclusive and reported as `NoResults`.
    pub async fn group_passes(&self, group: JobGroup, incident: u64) -> Result<bool, ApprovalError> {
        self.caches
            .groups
            .get_or_try_insert((group.settings_id, group.kind, incident), || {
                self.fetch_group(group, incident)
            })
            .await
    }

    /// Verdict over several groups: false on the first failed group, true when
    /// at least one group passed and none failed
    pub async fn groups_pass(&self, groups: &[JobGroup], incident: u64) -> bool {
        let mut passed = false;
        for group in groups {
            match self.group_passes(*group, incident).await {
                Ok(true) => passed = true,
                Ok(false) => return false,
                Err(e) => {
                    info!(error = %e, "Group skipped");
                    continue;
                }
            }
        }
        passed
    }
}
