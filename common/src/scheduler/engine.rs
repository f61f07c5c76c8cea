// Scheduler engine: one batch run from dashboard incidents to openQA triggers

use super::{DashboardHistory, ScheduleContext, TriggerRequest, TriggerSource};
use crate::clients::repo::incident_revisions;
use crate::clients::{Dashboard, ImageSource, Orchestrator, RepoMetadata};
use crate::config::RepositoryConfig;
use crate::errors::ClientError;
use crate::models::{Incident, RunSummary};
use crate::payload::{ARCH, BUILD, FLAVOR};
use crate::product::ProductConfig;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for one scheduler run
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Log triggers instead of posting them
    pub dry: bool,
    /// Schedule even when the dashboard already knows the same revision
    pub ignore_onetime: bool,
    /// URL of the CI job running this batch
    pub ci_url: Option<String>,
    pub repositories: RepositoryConfig,
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    dashboard: Arc<dyn Dashboard>,
    orchestrator: Arc<dyn Orchestrator>,
    repo: Arc<dyn RepoMetadata>,
    images: Arc<dyn ImageSource>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        dashboard: Arc<dyn Dashboard>,
        orchestrator: Arc<dyn Orchestrator>,
        repo: Arc<dyn RepoMetadata>,
        images: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            config,
            dashboard,
            orchestrator,
            repo,
            images,
        }
    }

    /// Active dashboard incidents, normalized and with repository revisions attached
    ///
    /// Incidents that cannot be normalized are logged and left out.
    #[instrument(skip(self))]
    pub async fn load_incidents(&self) -> Result<Vec<Incident>, ClientError> {
        let raw = self.dashboard.incidents().await?;
        debug!(incident_count = raw.len(), "Fetched incidents from dashboard");

        let mut incidents = Vec::new();
        for raw in raw.iter().filter(|raw| raw.is_active) {
            let incident = match Incident::from_dashboard(raw) {
                Ok(incident) => incident,
                Err(e) => {
                    info!(incident = raw.number, error = %e, "Incident skipped");
                    continue;
                }
            };
            let revisions = incident_revisions(self.repo.as_ref(), &incident).await;
            incidents.push(incident.with_revisions(revisions));
        }

        info!(incident_count = incidents.len(), "Incidents loaded");
        Ok(incidents)
    }

    /// Trigger requests of every config record, in config order
    pub async fn triggers(
        &self,
        configs: &[ProductConfig],
        incidents: &[Incident],
        today: NaiveDate,
    ) -> Vec<TriggerRequest> {
        let history = DashboardHistory::new(self.dashboard.clone());
        let ctx = ScheduleContext {
            history: &history,
            images: self.images.as_ref(),
            repositories: &self.config.repositories,
            ci_url: self.config.ci_url.as_deref(),
            ignore_idempotency: self.config.ignore_onetime,
            today,
        };

        let mut requests = Vec::new();
        for config in configs {
            requests.extend(config.triggers(incidents, &ctx).await);
        }
        requests
    }

    /// Post one trigger to openQA, then store its job setting
    #[instrument(skip_all, fields(
        flavor = request.payload.get(FLAVOR).unwrap_or_default(),
        arch = request.payload.get(ARCH).unwrap_or_default(),
        build = request.payload.get(BUILD).unwrap_or_default(),
    ))]
    async fn submit(&self, request: &TriggerRequest) -> Result<(), ClientError> {
        if let Err(e) = self.orchestrator.trigger(&request.payload).await {
            error!(error = %e, "openQA trigger failed, dashboard not updated");
            return Err(e);
        }

        match self.dashboard.put_job_setting(&request.record).await {
            Ok(id) => {
                info!(settings_id = ?id, kind = %request.record.kind(), "Job setting stored");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Storing job setting failed");
                Err(e)
            }
        }
    }

    /// Run one scheduling batch
    ///
    /// Only a failure to list incidents aborts the run; every other failure is
    /// counted in the summary.
    #[instrument(skip_all, fields(dry = self.config.dry, configs = configs.len()))]
    pub async fn run(&self, configs: &[ProductConfig]) -> Result<RunSummary, ClientError> {
        let incidents = self.load_incidents().await?;
        let requests = self
            .triggers(configs, &incidents, Utc::now().date_naive())
            .await;
        info!(triggers = requests.len(), "Triggers computed");

        let mut summary = RunSummary::default();
        for request in &requests {
            if self.config.dry {
                info!(payload = ?request.payload.as_map(), "Dry run, trigger not posted");
                summary.skipped += 1;
                continue;
            }
            match self.submit(request).await {
                Ok(()) => summary.succeeded += 1,
                Err(_) => summary.failed += 1,
            }
        }

        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some triggers failed");
        }
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Scheduling run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fakes::{dashboard_incident, FakeDashboard, FakeOrchestrator, FakeRepo};
    use crate::models::{Channel, JobSettingRecord, ProdVer};
    use crate::payload::{INCIDENT_ID, REPOHASH};
    use crate::product::{AggregatePolicy, FlavorConfig, IncidentsConfig};
    use crate::scheduler::fakes::{repositories, FakeImages};
    use std::collections::BTreeMap;

    const CHANNEL: &str = "SUSE:Updates:SLES:15-SP4:x86_64";

    fn incidents_config(flavors: &[&str]) -> ProductConfig {
        let flavors = flavors
            .iter()
            .map(|name| {
                let mut issue_map = BTreeMap::new();
                issue_map.insert("OS_TEST_ISSUES".to_string(), ProdVer::new("SLES", "15-SP4"));
                let flavor = FlavorConfig {
                    name: name.to_string(),
                    architectures: ["x86_64".to_string()].into_iter().collect(),
                    issue_map,
                    required_packages: None,
                    excluded_packages: None,
                    required_issues: None,
                    aggregate_policy: AggregatePolicy::Always,
                    priority_override: None,
                    params_expand: BTreeMap::new(),
                };
                (name.to_string(), flavor)
            })
            .collect();

        ProductConfig::Incidents(IncidentsConfig {
            product: "SLES15SP4".to_string(),
            version: "15-SP4".to_string(),
            distri: "sle".to_string(),
            extra_settings: BTreeMap::new(),
            flavors,
            single_arch_packages: Default::default(),
        })
    }

    fn repo() -> FakeRepo {
        let mut repo = FakeRepo::default();
        repo.revisions.insert(
            (100, Channel::new("SLES", "15-SP4", "x86_64")),
            "1700000000".to_string(),
        );
        repo
    }

    fn engine(
        config: SchedulerConfig,
        dashboard: Arc<FakeDashboard>,
        orchestrator: Arc<FakeOrchestrator>,
    ) -> SchedulerEngine {
        SchedulerEngine::new(
            config,
            dashboard,
            orchestrator,
            Arc::new(repo()),
            Arc::new(FakeImages::default()),
        )
    }

    fn config(dry: bool) -> SchedulerConfig {
        SchedulerConfig {
            dry,
            ignore_onetime: false,
            ci_url: None,
            repositories: repositories(),
        }
    }

    fn dashboard() -> FakeDashboard {
        let mut inactive = dashboard_incident(101, Some(2001), &[CHANNEL]);
        inactive.is_active = false;
        FakeDashboard {
            incidents: vec![
                dashboard_incident(100, Some(2000), &[CHANNEL]),
                inactive,
                dashboard_incident(102, Some(2002), &["SUSE:Updates:SLE-Module-Development-Tools-OBS:15-SP4:x86_64"]),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_incidents_normalizes_active_incidents() {
        let engine = engine(config(true), Arc::new(dashboard()), Arc::new(FakeOrchestrator::default()));
        let incidents = engine.load_incidents().await.unwrap();

        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].id, 100);
        assert_eq!(incidents[0].revision("x86_64", "15-SP4"), Some("1700000000"));
    }

    #[tokio::test]
    async fn test_run_posts_trigger_and_stores_setting() {
        let dashboard = Arc::new(dashboard());
        let orchestrator = Arc::new(FakeOrchestrator::default());
        let engine = engine(config(false), dashboard.clone(), orchestrator.clone());

        let summary = engine
            .run(&[incidents_config(&["Server-DVD-Incidents"])])
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { succeeded: 1, failed: 0, skipped: 0 });
        let triggered = orchestrator.triggered();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].get(INCIDENT_ID), Some("100"));
        assert_eq!(triggered[0].get(REPOHASH), Some("1700000000"));

        let stored = dashboard.stored_settings();
        assert!(matches!(&stored[..], [JobSettingRecord::Incident(s)] if s.incident_id == 100));
    }

    #[tokio::test]
    async fn test_failed_trigger_skips_dashboard_and_fails_run() {
        let dashboard = Arc::new(dashboard());
        let mut orchestrator = FakeOrchestrator::default();
        orchestrator
            .failing_flavors
            .insert("Server-DVD-Incidents".to_string());
        let orchestrator = Arc::new(orchestrator);
        let engine = engine(config(false), dashboard.clone(), orchestrator.clone());

        let summary = engine
            .run(&[incidents_config(&["Server-DVD-Incidents", "Desktop-DVD-Incidents"])])
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(dashboard.stored_settings().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_posts_nothing() {
        let dashboard = Arc::new(dashboard());
        let orchestrator = Arc::new(FakeOrchestrator::default());
        let engine = engine(config(true), dashboard.clone(), orchestrator.clone());

        let summary = engine
            .run(&[incidents_config(&["Server-DVD-Incidents"])])
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.exit_code(), 0);
        assert!(orchestrator.triggered().is_empty());
        assert!(dashboard.stored_settings().is_empty());
    }
}
