// Approval engine: accept reviews of incidents whose test results are clean

pub mod narrow;
pub mod results;

pub use results::{acceptable_comment, ApprovalCaches, ResultJudge};

use crate::clients::{Dashboard, Orchestrator, ReviewSystem};
use crate::errors::{ApprovalError, ClientError};
use crate::models::{IncidentRequest, JobGroup, RunSummary, SettingsKind};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Configuration for one approver run
#[derive(Debug, Clone)]
pub struct ApproverConfig {
    pub dry: bool,
    /// Judge a single incident instead of every incident awaiting review
    pub incident: Option<u64>,
    /// Judge settings of every submission instead of the newest one
    pub all_incidents: bool,
    pub review_group: String,
    pub maintenance_project: String,
    /// Dashboard URL quoted in the approval message
    pub dashboard_url: String,
}

/// Outcome of a review transition that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approved {
    Accepted,
    /// The review system refused because the review was already accepted
    AlreadyApproved,
    /// The request no longer exists
    Vanished,
}

pub struct Approver {
    config: ApproverConfig,
    dashboard: Arc<dyn Dashboard>,
    review: Arc<dyn ReviewSystem>,
    judge: ResultJudge,
}

impl Approver {
    pub fn new(
        config: ApproverConfig,
        dashboard: Arc<dyn Dashboard>,
        orchestrator: Arc<dyn Orchestrator>,
        review: Arc<dyn ReviewSystem>,
        caches: ApprovalCaches,
    ) -> Self {
        let judge = ResultJudge::new(dashboard.clone(), orchestrator, caches);
        Self {
            config,
            dashboard,
            review,
            judge,
        }
    }

    fn label(&self, request: &IncidentRequest) -> String {
        request.display_with(&self.config.maintenance_project)
    }

    /// Incidents whose review request waits for the approving group
    #[instrument(skip(self))]
    pub async fn incident_requests(&self) -> Result<Vec<IncidentRequest>, ClientError> {
        if let Some(id) = self.config.incident {
            let raw = self.dashboard.incident(id).await?;
            let request = IncidentRequest::from_dashboard(&raw);
            if request.is_none() {
                warn!(incident = id, "Incident has no review request");
            }
            return Ok(request.into_iter().collect());
        }

        let requests: Vec<IncidentRequest> = self
            .dashboard
            .incidents()
            .await?
            .iter()
            .filter(|raw| raw.is_active && raw.in_review_qam && !raw.approved)
            .filter_map(IncidentRequest::from_dashboard)
            .collect();
        info!(count = requests.len(), "Incidents awaiting approval");
        Ok(requests)
    }

    async fn incident_groups(&self, incident: u64) -> Result<Vec<JobGroup>, ApprovalError> {
        let settings = match self.dashboard.incident_settings(incident).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(incident, error = %e, "Cannot read incident settings");
                Vec::new()
            }
        };
        let settings = if self.config.all_incidents {
            settings
        } else {
            narrow::newest_request(settings)
        };
        if settings.is_empty() {
            return Err(ApprovalError::NoSettings {
                incident,
                kind: SettingsKind::Incident.to_string(),
            });
        }

        Ok(settings
            .iter()
            .map(|s| JobGroup {
                settings_id: s.id,
                kind: SettingsKind::Incident,
                needs_aggregate: s.with_aggregate,
            })
            .collect())
    }

    async fn aggregate_groups(&self, incident: u64) -> Result<Vec<JobGroup>, ApprovalError> {
        let settings = match self.dashboard.aggregate_settings(incident).await {
            Ok(settings) => narrow::newest_build_day(settings),
            Err(e) => {
                warn!(incident, error = %e, "Cannot read aggregate settings");
                Vec::new()
            }
        };
        if settings.is_empty() {
            return Err(ApprovalError::NoSettings {
                incident,
                kind: SettingsKind::Aggregate.to_string(),
            });
        }

        Ok(settings
            .iter()
            .map(|s| JobGroup {
                settings_id: s.id,
                kind: SettingsKind::Aggregate,
                needs_aggregate: false,
            })
            .collect())
    }

    /// Whether every test of the incident, and of its aggregates when needed, passed
    #[instrument(skip_all, fields(incident = request.incident, request = request.request))]
    pub async fn is_approvable(&self, request: &IncidentRequest) -> bool {
        let label = self.label(request);

        let incident_groups = match self.incident_groups(request.incident).await {
            Ok(groups) => groups,
            Err(e) => {
                info!(error = %e, "Not approvable");
                return false;
            }
        };
        let needs_aggregate = incident_groups.iter().any(|g| g.needs_aggregate);

        let aggregate_groups = match self.aggregate_groups(request.incident).await {
            Ok(groups) => groups,
            Err(e) => {
                info!(error = %e, "No aggregate settings");
                if needs_aggregate {
                    info!(incident = %label, "Aggregate missing");
                    return false;
                }
                Vec::new()
            }
        };

        if !self.judge.groups_pass(&incident_groups, request.incident).await {
            info!(incident = %label, "At least one failed job in incident tests");
            return false;
        }

        if needs_aggregate && !self.judge.groups_pass(&aggregate_groups, request.incident).await {
            info!(incident = %label, "At least one failed job in aggregate tests");
            return false;
        }

        true
    }

    /// Accept the review of one request
    #[instrument(skip_all, fields(incident = request.incident, request = request.request))]
    pub async fn approve(&self, request: &IncidentRequest) -> Result<Approved, ApprovalError> {
        let message = format!(
            "Request accepted for '{}' based on data in {}",
            self.config.review_group, self.config.dashboard_url
        );
        info!(incident = %self.label(request), "Accepting review");

        match self
            .review
            .accept_review(request.request, &self.config.review_group, &message)
            .await
        {
            Ok(()) => Ok(Approved::Accepted),
            Err(e) => match e.status() {
                Some(403) => {
                    info!(error = %e, "Request likely already approved, ignoring");
                    Ok(Approved::AlreadyApproved)
                }
                Some(404) => {
                    info!(error = %e, "Request removed or problem on review side, ignoring");
                    Ok(Approved::Vanished)
                }
                _ => Err(ApprovalError::Review {
                    request: request.request,
                    source: e,
                }),
            },
        }
    }

    /// Run one approval batch
    ///
    /// Only a failure to list incidents aborts the run.
    #[instrument(skip(self), fields(dry = self.config.dry))]
    pub async fn run(&self) -> Result<RunSummary, ClientError> {
        info!("Start approving incidents");
        let requests = self.incident_requests().await?;

        let mut summary = RunSummary::default();
        let mut approvable = Vec::new();
        for request in requests {
            if self.is_approvable(&request).await {
                approvable.push(request);
            } else {
                summary.skipped += 1;
            }
        }

        info!(count = approvable.len(), "Incidents to approve");
        for request in &approvable {
            info!(incident = %self.label(request), "To approve");
        }

        for request in &approvable {
            if self.config.dry {
                summary.skipped += 1;
                continue;
            }
            match self.approve(request).await {
                Ok(Approved::Accepted) | Ok(Approved::AlreadyApproved) => summary.succeeded += 1,
                Ok(Approved::Vanished) => summary.skipped += 1,
                Err(e) => {
                    error!(incident = %self.label(request), error = %e, "Approval failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "End of approver run"
        );
        Ok(summary)
    }
}
