// Incident-kind trigger source: one trigger per incident × flavor × arch

use super::images::resolve_directives;
use super::priority::priority;
use super::{ScheduleContext, TriggerRequest, TriggerSource};
use crate::models::{Channel, Incident, IncidentJobSetting, JobSettingRecord};
use crate::payload::{
    Payload, PayloadKind, ARCH, BUILD, CI_JOB_URL, DASHBOARD_INCIDENT_URL, DISTRI, FLAVOR,
    INCIDENT_ID, INCIDENT_REPO, KGRAFT, OBSOLETE, ONLY_OBSOLETE_SAME_BUILD, PRIORITY, REPOHASH,
    RRID, SMELT_INCIDENT_URL, VERSION,
};
use crate::product::{FlavorConfig, IncidentsConfig};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, instrument, warn};

/// Issue slots of which a kernel flavor needs at least one
pub const KERNEL_ISSUES: [&str; 4] = [
    "OS_TEST_ISSUES",
    "LTSS_TEST_ISSUES",
    "BASE_TEST_ISSUES",
    "RT_TEST_ISSUES",
];

/// Issue slots of a flavor whose channel an incident publishes into
#[derive(Debug, Default)]
struct IssueMatch {
    issues: BTreeSet<String>,
    channels: BTreeSet<Channel>,
}

fn match_issues(flavor: &FlavorConfig, arch: &str, incident: &Incident) -> IssueMatch {
    let mut matched = IssueMatch::default();
    for (issue, prodver) in &flavor.issue_map {
        let channel = prodver.channel(arch);
        if incident.channels.contains(&channel) {
            matched.issues.insert(issue.clone());
            matched.channels.insert(channel);
        }
    }
    matched
}

/// Whether a kernel flavor lacks every kernel product repository
fn fails_kernel_gate(flavor: &str, incident: &Incident, issues: &BTreeSet<String>) -> bool {
    flavor.contains("Kernel")
        && !incident.livepatch
        && !flavor.ends_with("Azure")
        && !KERNEL_ISSUES.iter().any(|key| issues.contains(*key))
}

/// Comma-joined, sorted download URLs of the matched channels
pub fn incident_repo(download_base: &str, incident: u64, channels: &BTreeSet<Channel>) -> String {
    let mut urls: Vec<String> = channels
        .iter()
        .map(|channel| channel.incident_url(download_base, incident))
        .collect();
    urls.sort();
    urls.join(",")
}

impl IncidentsConfig {
    /// Settings shared by every trigger of this product
    fn base_stage(&self, flavor: &str, arch: &str, incident: &Incident, ci_url: Option<&str>) -> Payload {
        Payload::new(PayloadKind::Incident)
            .merge(self.extra_settings.clone())
            .with(ARCH, arch)
            .with(FLAVOR, flavor)
            .with(VERSION, self.version.clone())
            .with(DISTRI, self.distri.clone())
            .with(ONLY_OBSOLETE_SAME_BUILD, "1")
            .with(OBSOLETE, "1")
            .with(INCIDENT_ID, incident.id.to_string())
            .with_opt(CI_JOB_URL, ci_url)
    }

    /// Trigger for one candidate, or None when a filter rejects it
    #[instrument(skip_all, fields(incident = incident.id, flavor = %flavor.name, arch = arch))]
    async fn candidate(
        &self,
        flavor: &FlavorConfig,
        arch: &str,
        incident: &Incident,
        ctx: &ScheduleContext<'_>,
    ) -> Option<TriggerRequest> {
        if incident.staging {
            debug!("Incident is staging, not scheduled");
            return None;
        }

        if let Some(required) = &flavor.required_packages {
            if !incident.contains_package(required) {
                debug!("Incident has none of the required packages");
                return None;
            }
        }
        if let Some(excluded) = &flavor.excluded_packages {
            if incident.contains_package(excluded) {
                debug!("Incident has an excluded package");
                return None;
            }
        }

        let Some(revision) = incident.revision(arch, &self.version) else {
            debug!(version = %self.version, "Incident has no repository revision for arch");
            return None;
        };

        let matched = match_issues(flavor, arch, incident);
        if matched.issues.is_empty() {
            debug!("No channels of incident match the flavor");
            return None;
        }

        if let Some(required) = &flavor.required_issues {
            if required.is_disjoint(&matched.issues) {
                debug!("Incident matches none of the required issues");
                return None;
            }
        }

        if !ctx.ignore_idempotency {
            match ctx
                .history
                .scheduled_repo_hashes(incident.id, &flavor.name, arch, &self.version)
                .await
            {
                Ok(hashes) if hashes.iter().any(|hash| hash == revision) => {
                    info!(repohash = revision, "Already scheduled with this repository revision");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Cannot read schedule history, assuming not scheduled");
                }
            }
        }

        if fails_kernel_gate(&flavor.name, incident, &matched.issues) {
            warn!("Kernel incident has no product repository");
            return None;
        }

        let payload = self
            .base_stage(&flavor.name, arch, incident, ctx.ci_url)
            .with_opt(KGRAFT, incident.livepatch.then_some("1"))
            .with(BUILD, build_name(incident))
            .with_opt(RRID, incident.rrid())
            .with(REPOHASH, revision)
            .merge(
                matched
                    .issues
                    .iter()
                    .map(|issue| (issue.clone(), incident.id.to_string())),
            )
            .with(
                INCIDENT_REPO,
                incident_repo(&ctx.repositories.download_base, incident.id, &matched.channels),
            );

        let needs_aggregate = flavor.aggregate_policy.needs_aggregate(payload.keys())
            && !incident
                .packages
                .iter()
                .any(|package| self.single_arch_packages.contains(package));
        if !needs_aggregate {
            debug!("Aggregate run not needed");
        }

        let payload = payload
            .with_opt(PRIORITY, priority(flavor, incident).map(|p| p.to_string()))
            .merge(flavor.params_expand.clone())
            .with(
                SMELT_INCIDENT_URL,
                format!("{}{}", ctx.repositories.smelt_incident_url, incident.id),
            )
            .with(
                DASHBOARD_INCIDENT_URL,
                format!("{}{}", ctx.repositories.dashboard_incident_url, incident.id),
            );

        let payload = match resolve_directives(ctx.images, payload).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Image directive unresolved, candidate dropped");
                return None;
            }
        };

        let payload = match payload.validate() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Invalid trigger payload, candidate dropped");
                return None;
            }
        };

        let record = JobSettingRecord::Incident(IncidentJobSetting {
            incident_id: incident.id,
            flavor: flavor.name.clone(),
            arch: arch.to_string(),
            version: self.version.clone(),
            repo_hash: revision.to_string(),
            settings: payload.as_map().clone(),
            needs_aggregate,
        });

        Some(TriggerRequest { payload, record })
    }
}

/// `:<incident>:<first package>`, packages being ordered shortest first
fn build_name(incident: &Incident) -> String {
    let package = incident.packages.first().map(String::as_str).unwrap_or_default();
    format!(":{}:{}", incident.id, package)
}

#[async_trait]
impl TriggerSource for IncidentsConfig {
    async fn triggers(
        &self,
        incidents: &[Incident],
        ctx: &ScheduleContext<'_>,
    ) -> Vec<TriggerRequest> {
        let mut requests = Vec::new();
        for flavor in self.flavors.values() {
            for arch in &flavor.architectures {
                for incident in incidents {
                    if let Some(request) = self.candidate(flavor, arch, incident, ctx).await {
                        requests.push(request);
                    }
                }
            }
        }

        let per_flavor: BTreeMap<&str, usize> =
            requests.iter().fold(BTreeMap::new(), |mut acc, request| {
                *acc.entry(request.payload.get(FLAVOR).unwrap_or_default())
                    .or_default() += 1;
                acc
            });
        info!(product = %self.product, triggers = requests.len(), flavors = ?per_flavor, "Incident triggers computed");
        requests
    }
}
