// Result sync: copy openQA job results into the dashboard

use crate::cache::RunCache;
use crate::clients::{Dashboard, JobQuery, JobResultPost, OpenQaJob, Orchestrator};
use crate::errors::ClientError;
use crate::models::{JobStatus, RunSummary, SettingsKind, StoredIncidentSetting};
use crate::payload::{BUILD, DISTRI, VERSION};
use crate::product::ProductArch;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// One job setting whose openQA build is synced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub settings_id: u64,
    pub kind: SettingsKind,
    pub distri: String,
    pub version: String,
    pub flavor: String,
    pub arch: String,
    pub build: String,
}

impl SyncTarget {
    /// Target of a stored incident setting; None when the payload lacks build keys
    pub fn from_incident_setting(setting: &StoredIncidentSetting) -> Option<Self> {
        Some(Self {
            settings_id: setting.id,
            kind: SettingsKind::Incident,
            distri: setting.setting(DISTRI)?,
            version: setting.setting(VERSION)?,
            flavor: setting.flavor.clone(),
            arch: setting.arch.clone(),
            build: setting.setting(BUILD)?,
        })
    }

    fn query(&self) -> JobQuery {
        JobQuery {
            distri: self.distri.clone(),
            version: self.version.clone(),
            flavor: self.flavor.clone(),
            arch: self.arch.clone(),
            build: self.build.clone(),
        }
    }

    /// Dashboard record of one openQA job of this target
    pub fn normalize(&self, job: &OpenQaJob, group: &str, group_id: u64) -> JobResultPost {
        let settings = Some(self.settings_id);
        JobResultPost {
            job_id: job.id,
            incident_settings: settings.filter(|_| self.kind == SettingsKind::Incident),
            update_settings: settings.filter(|_| self.kind == SettingsKind::Aggregate),
            name: job.name.clone(),
            distri: self.distri.clone(),
            group_id,
            job_group: group.to_string(),
            version: self.version.clone(),
            arch: self.arch.clone(),
            flavor: self.flavor.clone(),
            build: self.build.clone(),
            status: JobStatus::from_openqa_result(&job.result),
        }
    }
}

pub struct ResultSync {
    dry: bool,
    dashboard: Arc<dyn Dashboard>,
    orchestrator: Arc<dyn Orchestrator>,
    devel_groups: RunCache<u64, bool>,
}

impl ResultSync {
    pub fn new(dry: bool, dashboard: Arc<dyn Dashboard>, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            dry,
            dashboard,
            orchestrator,
            devel_groups: RunCache::new(),
        }
    }

    /// Targets of every stored incident setting of the active incidents
    #[instrument(skip(self))]
    pub async fn incident_targets(&self) -> Result<Vec<SyncTarget>, ClientError> {
        let mut targets = Vec::new();
        for incident in self.dashboard.incidents().await?.iter().filter(|i| i.is_active) {
            let settings = match self.dashboard.incident_settings(incident.number).await {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(incident = incident.number, error = %e, "Cannot read incident settings");
                    continue;
                }
            };
            for setting in &settings {
                match SyncTarget::from_incident_setting(setting) {
                    Some(target) => targets.push(target),
                    None => debug!(settings_id = setting.id, "Setting without build keys"),
                }
            }
        }
        info!(targets = targets.len(), "Incident sync targets");
        Ok(targets)
    }

    /// Targets of the newest aggregate build of every product arch
    #[instrument(skip_all, fields(products = products.len()))]
    pub async fn aggregate_targets(&self, products: &[ProductArch]) -> Vec<SyncTarget> {
        let mut targets = Vec::new();
        for product in products {
            match self.dashboard.latest_aggregate(&product.product, &product.arch).await {
                Ok(Some(setting)) => targets.push(SyncTarget {
                    settings_id: setting.id,
                    kind: SettingsKind::Aggregate,
                    distri: product.distri.clone(),
                    version: product.version.clone(),
                    flavor: product.flavor.clone(),
                    arch: product.arch.clone(),
                    build: setting.build,
                }),
                Ok(None) => debug!(product = %product.product, arch = %product.arch, "No aggregate build"),
                Err(e) => {
                    warn!(product = %product.product, arch = %product.arch, error = %e, "Cannot read aggregate settings")
                }
            }
        }
        info!(targets = targets.len(), "Aggregate sync targets");
        targets
    }

    async fn is_devel(&self, group: &str, group_id: u64) -> bool {
        if group.contains("Devel") || group.contains("Test") {
            return true;
        }
        match self
            .devel_groups
            .get_or_try_insert(group_id, || self.orchestrator.is_devel_group(group_id))
            .await
        {
            Ok(devel) => devel,
            Err(e) => {
                warn!(group_id, error = %e, "Cannot read job group, treating as development group");
                true
            }
        }
    }

    /// Group name and id of a job worth syncing, or None
    pub async fn filter_job<'a>(&self, job: &'a OpenQaJob) -> Option<(&'a str, u64)> {
        let (Some(group), Some(group_id)) = (job.group.as_deref(), job.group_id) else {
            debug!(job_id = job.id, "Job without group, ignoring");
            return None;
        };
        if let Some(clone) = job.clone_id {
            info!(job_id = job.id, clone_id = clone, "Job already has a clone, ignoring");
            return None;
        }
        if self.is_devel(group, group_id).await {
            info!(job_id = job.id, group = %group, "Ignoring job in development group");
            return None;
        }
        Some((group, group_id))
    }

    async fn post(&self, result: &JobResultPost) -> Result<(), ClientError> {
        debug!(job_id = result.job_id, status = ?result.status, "Posting job result");
        self.dashboard.put_job_result(result).await
    }

    /// Sync the jobs of every target
    #[instrument(skip_all, fields(dry = self.dry, targets = targets.len()))]
    pub async fn run(&self, targets: &[SyncTarget]) -> RunSummary {
        let mut summary = RunSummary::default();
        for target in targets {
            let jobs = match self.orchestrator.jobs(&target.query()).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(settings_id = target.settings_id, build = %target.build, error = %e, "Cannot list jobs");
                    summary.failed += 1;
                    continue;
                }
            };

            for job in &jobs {
                let Some((group, group_id)) = self.filter_job(job).await else {
                    continue;
                };
                let result = target.normalize(job, group, group_id);
                if self.dry {
                    info!(job_id = job.id, "Dry run, dashboard untouched");
                    summary.skipped += 1;
                    continue;
                }
                match self.post(&result).await {
                    Ok(()) => summary.succeeded += 1,
                    Err(e) => {
                        error!(job_id = job.id, error = %e, "Posting job result failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Result sync finished"
        );
        summary
    }
}
