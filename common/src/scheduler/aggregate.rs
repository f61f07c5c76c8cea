// Aggregate-kind trigger source: one daily build per product arch

use super::images::resolve_directives;
use super::{ScheduleContext, TriggerRequest, TriggerSource};
use crate::models::{base_version, AggregateJobSetting, Incident, JobSettingRecord};
use crate::payload::{
    Payload, PayloadKind, ARCH, BUILD, CI_JOB_URL, DEPRIORITIZE_BUILD, DISTRI, FLAVOR, REPOHASH,
    VERSION,
};
use crate::product::AggregateConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, instrument, warn};

/// Hash over the incidents of an aggregate and their revisions
pub fn repo_hash<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (u64, &'a str)>,
{
    let sorted: BTreeSet<String> = entries
        .into_iter()
        .map(|(id, revision)| format!("{}:{}", id, revision))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(b"start");
    for entry in &sorted {
        hasher.update(entry.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Build number following `previous`, or None when the repositories did not change today
///
/// Builds are `<YYYYMMDD>-<n>`: n increments within a day and restarts at 1.
pub fn next_build(
    today: NaiveDate,
    previous: Option<(&str, &str)>,
    repo_hash: &str,
) -> Option<(String, u32)> {
    let day = today.format("%Y%m%d").to_string();

    let counter = match previous {
        Some((build, previous_hash)) => match build.split_once('-') {
            Some((build_day, n)) if build_day == day => {
                if previous_hash == repo_hash {
                    return None;
                }
                n.parse::<u32>().map(|n| n + 1).unwrap_or(1)
            }
            _ => 1,
        },
        None => 1,
    };

    Some((format!("{}-{}", day, counter), counter))
}

/// Incidents per test-issue slot for one arch
fn slot_incidents<'a>(
    config: &AggregateConfig,
    arch: &str,
    incidents: &'a [Incident],
) -> BTreeMap<String, Vec<&'a Incident>> {
    let mut slots: BTreeMap<String, Vec<&Incident>> = BTreeMap::new();
    for (slot, prodver) in &config.test_issues {
        let channel = prodver.channel(arch);
        let mut members: Vec<&Incident> = incidents
            .iter()
            .filter(|incident| !incident.staging && incident.channels.contains(&channel))
            .collect();
        members.sort_by_key(|incident| incident.id);
        if !members.is_empty() {
            slots.insert(slot.clone(), members);
        }
    }
    slots
}

impl AggregateConfig {
    #[instrument(skip_all, fields(product = %self.product, flavor = %self.flavor, arch = arch))]
    async fn arch_trigger(
        &self,
        arch: &str,
        incidents: &[Incident],
        ctx: &ScheduleContext<'_>,
    ) -> Option<TriggerRequest> {
        let slots = slot_incidents(self, arch, incidents);
        let members: BTreeMap<u64, &Incident> = slots
            .values()
            .flatten()
            .map(|incident| (incident.id, *incident))
            .collect();

        let version = base_version(&self.version);
        let hash = repo_hash(members.values().map(|incident| {
            (
                incident.id,
                incident.revision(arch, version).unwrap_or_default(),
            )
        }));

        let previous = match ctx.history.latest_aggregate(&self.product, arch).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "Cannot read previous aggregate build");
                None
            }
        };

        let Some((build, counter)) = next_build(
            ctx.today,
            previous
                .as_ref()
                .map(|p| (p.build.as_str(), p.repohash.as_str())),
            &hash,
        ) else {
            info!(repohash = %hash, "Repositories unchanged since today's build, not scheduled");
            return None;
        };

        if self.onetime && counter > 1 && !ctx.ignore_idempotency {
            info!(build = %build, "One build per day already scheduled");
            return None;
        }

        let mut payload = Payload::new(PayloadKind::Aggregate)
            .merge(self.extra_settings.clone())
            .with(VERSION, self.version.clone())
            .with(DISTRI, self.distri.clone())
            .with(FLAVOR, self.flavor.clone())
            .with(ARCH, arch)
            .with(BUILD, build.clone())
            .with(REPOHASH, hash.clone())
            .with(DEPRIORITIZE_BUILD, "1")
            .with_opt(CI_JOB_URL, ctx.ci_url);

        for (slot, members) in &slots {
            let Some(channel) = self.test_issues.get(slot) else {
                continue;
            };
            let ids: Vec<String> = members.iter().map(|i| i.id.to_string()).collect();
            let repos: Vec<String> = members
                .iter()
                .map(|i| {
                    format!(
                        "{}/",
                        channel
                            .channel(arch)
                            .incident_url(&ctx.repositories.download_base, i.id)
                    )
                })
                .collect();
            payload = payload
                .with(slot.clone(), ids.join(","))
                .with(slot.replace("ISSUES", "REPOS"), repos.join(","));
        }

        let payload = match resolve_directives(ctx.images, payload).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Image directive unresolved, aggregate dropped");
                return None;
            }
        };

        let payload = match payload.validate() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Invalid aggregate payload");
                return None;
            }
        };

        debug!(build = %build, incidents = members.len(), "Aggregate trigger built");
        let record = JobSettingRecord::Aggregate(AggregateJobSetting {
            product: self.product.clone(),
            arch: arch.to_string(),
            build,
            repo_hash: hash,
            incidents: members.keys().copied().collect(),
            settings: payload.as_map().clone(),
        });

        Some(TriggerRequest { payload, record })
    }
}

#[async_trait]
impl TriggerSource for AggregateConfig {
    async fn triggers(
        &self,
        incidents: &[Incident],
        ctx: &ScheduleContext<'_>,
    ) -> Vec<TriggerRequest> {
        let mut requests = Vec::new();
        for arch in &self.architectures {
            if let Some(request) = self.arch_trigger(arch, incidents, ctx).await {
                requests.push(request);
            }
        }
        info!(product = %self.product, triggers = requests.len(), "Aggregate triggers computed");
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArchVer, Channel, ProdVer};
    use crate::scheduler::fakes::{context, repositories, FakeHistory, FakeImages};
    use std::collections::HashMap;

    fn config(onetime: bool) -> AggregateConfig {
        let mut test_issues = BTreeMap::new();
        test_issues.insert("OS_TEST_ISSUES".to_string(), ProdVer::new("SLES", "15-SP4"));
        test_issues.insert(
            "BASE_TEST_ISSUES".to_string(),
            ProdVer::new("SLE-Module-Basesystem", "15-SP4"),
        );
        AggregateConfig {
            product: "SLES15SP4".to_string(),
            version: "15-SP4".to_string(),
            distri: "sle".to_string(),
            extra_settings: BTreeMap::new(),
            flavor: "Server-DVD-Updates".to_string(),
            architectures: ["x86_64".to_string()].into_iter().collect(),
            onetime,
            test_issues,
        }
    }

    fn incident(id: u64, revision: &str, channels: &[Channel], staging: bool) -> Incident {
        let mut revisions = HashMap::new();
        revisions.insert(ArchVer::new("x86_64", "15-SP4"), revision.to_string());
        Incident {
            id,
            request_id: None,
            project: String::new(),
            packages: vec!["foo".to_string()],
            channels: channels.iter().cloned().collect(),
            revisions,
            staging,
            livepatch: false,
            emu: false,
        }
    }

    fn incidents() -> Vec<Incident> {
        vec![
            incident(200, "20", &[Channel::new("SLES", "15-SP4", "x86_64")], false),
            incident(
                100,
                "10",
                &[
                    Channel::new("SLES", "15-SP4", "x86_64"),
                    Channel::new("SLE-Module-Basesystem", "15-SP4", "x86_64"),
                ],
                false,
            ),
            incident(300, "30", &[Channel::new("SLES", "15-SP4", "x86_64")], true),
        ]
    }

    #[test]
    fn test_repo_hash_ignores_order() {
        assert_eq!(
            repo_hash([(1, "a"), (2, "b")]),
            repo_hash([(2, "b"), (1, "a")])
        );
        assert_ne!(repo_hash([(1, "a")]), repo_hash([(1, "b")]));
    }

    #[test]
    fn test_next_build_numbering() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(next_build(today, None, "h"), Some(("20240102-1".to_string(), 1)));
        assert_eq!(
            next_build(today, Some(("20240101-4", "h")), "h"),
            Some(("20240102-1".to_string(), 1))
        );
        assert_eq!(
            next_build(today, Some(("20240102-2", "old")), "h"),
            Some(("20240102-3".to_string(), 3))
        );
        assert_eq!(next_build(today, Some(("20240102-2", "h")), "h"), None);
    }

    #[tokio::test]
    async fn test_aggregate_payload() {
        let history = FakeHistory::default();
        let images = FakeImages::default();
        let repos = repositories();
        let mut ctx = context(&history, &images, &repos);
        ctx.ci_url = Some("https://ci/job/1");

        let requests = config(false).triggers(&incidents(), &ctx).await;
        assert_eq!(requests.len(), 1);

        let payload = &requests[0].payload;
        assert_eq!(payload.get(BUILD), Some("20240102-1"));
        assert_eq!(payload.get(DEPRIORITIZE_BUILD), Some("1"));
        assert_eq!(payload.get(CI_JOB_URL), Some("https://ci/job/1"));
        assert_eq!(payload.get("OS_TEST_ISSUES"), Some("100,200"));
        assert_eq!(payload.get("BASE_TEST_ISSUES"), Some("100"));
        assert_eq!(
            payload.get("BASE_TEST_REPOS"),
            Some("http://download.suse.de/ibs/SUSE:/Maintenance:/100/SUSE_Updates_SLE-Module-Basesystem_15-SP4_x86_64/")
        );

        let JobSettingRecord::Aggregate(record) = &requests[0].record else {
            panic!("expected aggregate record");
        };
        assert_eq!(record.incidents, vec![100, 200]);
        assert_eq!(record.repo_hash, repo_hash([(100, "10"), (200, "20")]));
    }

    #[tokio::test]
    async fn test_unchanged_repositories_are_not_rescheduled() {
        let history = FakeHistory::default();
        let hash = repo_hash([(100, "10"), (200, "20")]);
        history.record_aggregate("SLES15SP4", "x86_64", "20240102-1", &hash);
        let images = FakeImages::default();
        let repos = repositories();
        let ctx = context(&history, &images, &repos);

        assert!(config(false).triggers(&incidents(), &ctx).await.is_empty());
    }

    #[tokio::test]
    async fn test_onetime_schedules_first_build_only() {
        let history = FakeHistory::default();
        history.record_aggregate("SLES15SP4", "x86_64", "20240102-1", "older");
        let images = FakeImages::default();
        let repos = repositories();
        let mut ctx = context(&history, &images, &repos);

        assert!(config(true).triggers(&incidents(), &ctx).await.is_empty());
        assert_eq!(config(false).triggers(&incidents(), &ctx).await.len(), 1);

        ctx.ignore_idempotency = true;
        let requests = config(true).triggers(&incidents(), &ctx).await;
        assert_eq!(requests[0].payload.get(BUILD), Some("20240102-2"));
    }
}
