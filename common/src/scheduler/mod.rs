// Scheduling engine: turns product configs and incidents into trigger requests

pub mod aggregate;
pub mod engine;
pub mod images;
pub mod incidents;
pub mod priority;

pub use engine::{SchedulerConfig, SchedulerEngine};

use crate::cache::RunCache;
use crate::clients::{Dashboard, ImageSource};
use crate::config::RepositoryConfig;
use crate::errors::ClientError;
use crate::models::{Incident, JobSettingRecord, StoredAggregateSetting, StoredIncidentSetting};
use crate::payload::{Payload, REPOHASH};
use crate::product::ProductConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

/// One job trigger: what to post to the orchestrator and what to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub payload: Payload,
    pub record: JobSettingRecord,
}

/// What has already been scheduled, as far as the dashboard knows
#[async_trait]
pub trait ScheduleHistory: Send + Sync {
    /// REPOHASH values stored for an incident × flavor × arch × version
    async fn scheduled_repo_hashes(
        &self,
        incident: u64,
        flavor: &str,
        arch: &str,
        version: &str,
    ) -> Result<Vec<String>, ClientError>;

    /// Newest aggregate setting of a product and arch
    async fn latest_aggregate(
        &self,
        product: &str,
        arch: &str,
    ) -> Result<Option<StoredAggregateSetting>, ClientError>;
}

/// Schedule history read from the dashboard, memoized per incident for one run
pub struct DashboardHistory {
    dashboard: Arc<dyn Dashboard>,
    settings: RunCache<u64, Vec<StoredIncidentSetting>>,
}

impl DashboardHistory {
    pub fn new(dashboard: Arc<dyn Dashboard>) -> Self {
        Self {
            dashboard,
            settings: RunCache::new(),
        }
    }
}

#[async_trait]
impl ScheduleHistory for DashboardHistory {
    async fn scheduled_repo_hashes(
        &self,
        incident: u64,
        flavor: &str,
        arch: &str,
        version: &str,
    ) -> Result<Vec<String>, ClientError> {
        let stored = self
            .settings
            .get_or_try_insert(incident, || self.dashboard.incident_settings(incident))
            .await?;

        Ok(stored
            .iter()
            .filter(|s| s.flavor == flavor && s.arch == arch)
            .filter(|s| s.version.is_empty() || s.version == version)
            .filter_map(|s| s.setting(REPOHASH))
            .collect())
    }

    async fn latest_aggregate(
        &self,
        product: &str,
        arch: &str,
    ) -> Result<Option<StoredAggregateSetting>, ClientError> {
        self.dashboard.latest_aggregate(product, arch).await
    }
}

/// Everything a trigger source needs besides its own config and the incidents
pub struct ScheduleContext<'a> {
    pub history: &'a dyn ScheduleHistory,
    pub images: &'a dyn ImageSource,
    pub repositories: &'a RepositoryConfig,
    pub ci_url: Option<&'a str>,
    pub ignore_idempotency: bool,
    /// Day used for aggregate build numbers
    pub today: NaiveDate,
}

/// A config record that can produce trigger requests
#[async_trait]
pub trait TriggerSource: Send + Sync {
    async fn triggers(
        &self,
        incidents: &[Incident],
        ctx: &ScheduleContext<'_>,
    ) -> Vec<TriggerRequest>;
}

#[async_trait]
impl TriggerSource for ProductConfig {
    async fn triggers(
        &self,
        incidents: &[Incident],
        ctx: &ScheduleContext<'_>,
    ) -> Vec<TriggerRequest> {
        match self {
            ProductConfig::Incidents(config) => config.triggers(incidents, ctx).await,
            ProductConfig::Aggregate(config) => config.triggers(incidents, ctx).await,
        }
    }
}

/// Trigger requests of one config record for the given incidents
pub async fn schedule(
    config: &ProductConfig,
    incidents: &[Incident],
    ctx: &ScheduleContext<'_>,
) -> Vec<TriggerRequest> {
    config.triggers(incidents, ctx).await
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use crate::clients::{PintImage, ToolsBuild};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory schedule history
    #[derive(Default)]
    pub struct FakeHistory {
        pub hashes: Mutex<HashMap<(u64, String, String), Vec<String>>>,
        pub aggregates: Mutex<HashMap<(String, String), StoredAggregateSetting>>,
        pub fail: bool,
    }

    impl FakeHistory {
        pub fn record(&self, incident: u64, flavor: &str, arch: &str, hash: &str) {
            self.hashes
                .lock()
                .unwrap()
                .entry((incident, flavor.to_string(), arch.to_string()))
                .or_default()
                .push(hash.to_string());
        }

        pub fn record_aggregate(&self, product: &str, arch: &str, build: &str, hash: &str) {
            let stored = StoredAggregateSetting {
                id: 1,
                build: build.to_string(),
                repohash: hash.to_string(),
                product: product.to_string(),
                arch: arch.to_string(),
                settings: Default::default(),
            };
            self.aggregates
                .lock()
                .unwrap()
                .insert((product.to_string(), arch.to_string()), stored);
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Request {
            url: "http://dashboard/".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[async_trait]
    impl ScheduleHistory for FakeHistory {
        async fn scheduled_repo_hashes(
            &self,
            incident: u64,
            flavor: &str,
            arch: &str,
            _version: &str,
        ) -> Result<Vec<String>, ClientError> {
            if self.fail {
                return Err(unavailable());
            }
            Ok(self
                .hashes
                .lock()
                .unwrap()
                .get(&(incident, flavor.to_string(), arch.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn latest_aggregate(
            &self,
            product: &str,
            arch: &str,
        ) -> Result<Option<StoredAggregateSetting>, ClientError> {
            if self.fail {
                return Err(unavailable());
            }
            Ok(self
                .aggregates
                .lock()
                .unwrap()
                .get(&(product.to_string(), arch.to_string()))
                .cloned())
        }
    }

    /// Image source with canned answers
    #[derive(Default)]
    pub struct FakeImages {
        pub tools: Vec<ToolsBuild>,
        pub index: Vec<String>,
        pub pint: HashMap<String, Vec<PintImage>>,
    }

    #[async_trait]
    impl ImageSource for FakeImages {
        async fn tools_builds(&self, _query_url: &str) -> Result<Vec<ToolsBuild>, ClientError> {
            Ok(self.tools.clone())
        }

        async fn image_index(&self) -> Result<Vec<String>, ClientError> {
            Ok(self.index.clone())
        }

        async fn pint_images(
            &self,
            _query_url: &str,
            state: &str,
        ) -> Result<Vec<PintImage>, ClientError> {
            Ok(self.pint.get(state).cloned().unwrap_or_default())
        }
    }

    pub fn repositories() -> RepositoryConfig {
        RepositoryConfig {
            download_base: "http://download.suse.de/ibs/SUSE:/Maintenance:/".to_string(),
            smelt_incident_url: "https://smelt.suse.de/incident/".to_string(),
            dashboard_incident_url: "https://dashboard.qam.suse.de/incident/".to_string(),
        }
    }

    pub fn context<'a>(
        history: &'a FakeHistory,
        images: &'a FakeImages,
        repositories: &'a RepositoryConfig,
    ) -> ScheduleContext<'a> {
        ScheduleContext {
            history,
            images,
            repositories,
            ci_url: None,
            ignore_idempotency: false,
            today: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SettingsKind;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingDashboard {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Dashboard for CountingDashboard {
        async fn incidents(&self) -> Result<Vec<crate::models::DashboardIncident>, ClientError> {
            Ok(Vec::new())
        }
        async fn incident(&self, _id: u64) -> Result<crate::models::DashboardIncident, ClientError> {
            unimplemented!()
        }
        async fn incident_settings(
            &self,
            incident: u64,
        ) -> Result<Vec<StoredIncidentSetting>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut settings = BTreeMap::new();
            settings.insert(REPOHASH.to_string(), serde_json::json!("hashA"));
            Ok(vec![StoredIncidentSetting {
                id: 1,
                incident,
                flavor: "Server-DVD-Incidents".to_string(),
                arch: "x86_64".to_string(),
                version: "15-SP4".to_string(),
                settings,
                with_aggregate: true,
            }])
        }
        async fn aggregate_settings(
            &self,
            _incident: u64,
        ) -> Result<Vec<StoredAggregateSetting>, ClientError> {
            Ok(Vec::new())
        }
        async fn latest_aggregate(
            &self,
            _product: &str,
            _arch: &str,
        ) -> Result<Option<StoredAggregateSetting>, ClientError> {
            Ok(None)
        }
        async fn job_results(
            &self,
            _kind: SettingsKind,
            _settings_id: u64,
        ) -> Result<Vec<crate::models::JobResult>, ClientError> {
            Ok(Vec::new())
        }
        async fn put_job_setting(
            &self,
            _record: &JobSettingRecord,
        ) -> Result<Option<u64>, ClientError> {
            Ok(None)
        }
        async fn put_job_result(
            &self,
            _result: &crate::clients::JobResultPost,
        ) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dashboard_history_filters_and_memoizes() {
        let dashboard = Arc::new(CountingDashboard {
            calls: AtomicU32::new(0),
        });
        let history = DashboardHistory::new(dashboard.clone());

        let hashes = history
            .scheduled_repo_hashes(100, "Server-DVD-Incidents", "x86_64", "15-SP4")
            .await
            .unwrap();
        assert_eq!(hashes, vec!["hashA".to_string()]);

        let other_arch = history
            .scheduled_repo_hashes(100, "Server-DVD-Incidents", "aarch64", "15-SP4")
            .await
            .unwrap();
        assert!(other_arch.is_empty());

        assert_eq!(dashboard.calls.load(Ordering::SeqCst), 1);
    }
}
