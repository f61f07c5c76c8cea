use crate::errors::IncidentError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Prefix of every maintenance update channel name
const UPDATES_PREFIX: &str = "SUSE:Updates:";

/// openSUSE channels are published without an architecture
pub const OPENSUSE_PRODUCT: &str = "openSUSE-SLE";

const IGNORED_PRODUCT: &str = "SLE-Module-Development-Tools-OBS";
const MANAGER_SERVER_PRODUCT: &str = "SLE-Module-SUSE-Manager-Server";

// ============================================================================
// Repository identifiers
// ============================================================================

/// Channel is a (product, version, arch) repository an incident publishes into
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel {
    pub product: String,
    pub version: String,
    pub arch: String,
}

impl Channel {
    pub fn new(
        product: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
            arch: arch.into(),
        }
    }

    /// Parse a dashboard channel name such as `SUSE:Updates:SLE-Module-Basesystem:15-SP4:x86_64`
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(UPDATES_PREFIX)?;
        let parts: Vec<&str> = rest.split(':').collect();
        match parts.as_slice() {
            [product, version] if *product == OPENSUSE_PRODUCT => {
                Some(Self::new(*product, *version, "x86_64"))
            }
            [product, version, arch] => Some(Self::new(*product, *version, *arch)),
            _ => None,
        }
    }

    /// Repository directory name below the incident's download location
    pub fn repo_dir(&self) -> String {
        if self.product == OPENSUSE_PRODUCT {
            format!("SUSE_Updates_{}_{}", self.product, self.version)
        } else {
            format!(
                "SUSE_Updates_{}_{}_{}",
                self.product, self.version, self.arch
            )
        }
    }

    /// Download URL of this channel for one incident
    pub fn incident_url(&self, download_base: &str, incident: u64) -> String {
        format!("{}{}/{}", download_base, incident, self.repo_dir())
    }

    fn is_ignored(&self) -> bool {
        self.product == IGNORED_PRODUCT
            || (self.product == MANAGER_SERVER_PRODUCT && self.arch == "aarch64")
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.product, self.version, self.arch)
    }
}

/// ProdVer identifies the repository channel family behind an issue slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProdVer {
    pub product: String,
    pub version: String,
}

impl ProdVer {
    pub fn new(product: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
        }
    }

    pub fn channel(&self, arch: &str) -> Channel {
        Channel::new(self.product.clone(), self.version.clone(), arch)
    }
}

impl FromStr for ProdVer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((product, version)) if !product.is_empty() && !version.is_empty() => {
                Ok(Self::new(product, version))
            }
            _ => Err(format!("'{}' is not of the form product:version", s)),
        }
    }
}

/// ArchVer keys the per-arch repository revision of an incident
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchVer {
    pub arch: String,
    pub version: String,
}

impl ArchVer {
    pub fn new(arch: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            version: version.into(),
        }
    }
}

/// Strip product suffixes from a channel version: `15-SP4-LTSS` → `15-SP4`
pub fn base_version(version: &str) -> &str {
    lazy_static::lazy_static! {
        static ref BASE_VERSION: Result<regex::Regex, regex::Error> =
            regex::Regex::new(r"^\d+(?:[.-]SP\d+|\.\d+)?");
    }
    BASE_VERSION
        .as_ref()
        .ok()
        .and_then(|re| re.find(version))
        .map(|m| m.as_str())
        .unwrap_or(version)
}

// ============================================================================
// Incident Models
// ============================================================================

/// Incident as served by the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardIncident {
    pub number: u64,
    #[serde(default)]
    pub rr_number: Option<u64>,
    #[serde(default)]
    pub project: String,
    #[serde(rename = "inReview", default)]
    pub in_review: bool,
    #[serde(rename = "inReviewQAM", default)]
    pub in_review_qam: bool,
    #[serde(rename = "isActive", default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub emu: bool,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Normalized view of one maintenance incident
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub id: u64,
    pub request_id: Option<u64>,
    pub project: String,
    /// Ordered by name length, shortest first
    pub packages: Vec<String>,
    pub channels: BTreeSet<Channel>,
    pub revisions: HashMap<ArchVer, String>,
    pub staging: bool,
    pub livepatch: bool,
    pub emu: bool,
}

impl Incident {
    /// Normalize a dashboard incident; revisions are attached separately
    pub fn from_dashboard(raw: &DashboardIncident) -> Result<Self, IncidentError> {
        let channels: BTreeSet<Channel> = raw
            .channels
            .iter()
            .filter_map(|name| Channel::parse(name))
            .filter(|channel| !channel.is_ignored())
            .collect();
        if channels.is_empty() {
            return Err(IncidentError::NoRepository(raw.number));
        }
        if raw.packages.is_empty() {
            return Err(IncidentError::NoPackages(raw.number));
        }

        let mut packages = raw.packages.clone();
        packages.sort_by_key(|p| p.len());

        Ok(Self {
            id: raw.number,
            request_id: raw.rr_number,
            project: raw.project.clone(),
            livepatch: Self::is_livepatch(&packages),
            packages,
            channels,
            revisions: HashMap::new(),
            staging: !raw.in_review,
            emu: raw.emu,
        })
    }

    pub fn with_revisions(mut self, revisions: HashMap<ArchVer, String>) -> Self {
        self.revisions = revisions;
        self
    }

    /// `<project>:<request>` identifier of the current review request
    pub fn rrid(&self) -> Option<String> {
        self.request_id
            .map(|request| format!("{}:{}", self.project, request))
    }

    pub fn revision(&self, arch: &str, version: &str) -> Option<&str> {
        self.revisions
            .get(&ArchVer::new(arch, version))
            .map(String::as_str)
    }

    /// Whether any package name starts with one of `requires`
    pub fn contains_package<'a, I>(&self, requires: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let requires: Vec<&String> = requires.into_iter().collect();
        self.packages
            .iter()
            .any(|package| requires.iter().any(|req| package.starts_with(req.as_str())))
    }

    fn is_livepatch(packages: &[String]) -> bool {
        let mut kgraft = false;
        for package in packages {
            if package.starts_with("kernel-default")
                || package.starts_with("kernel-source")
                || package.starts_with("kernel-azure")
            {
                return false;
            }
            if package.starts_with("kgraft-patch-") || package.starts_with("kernel-livepatch") {
                kgraft = true;
            }
        }
        kgraft
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// An incident together with the review request awaiting approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IncidentRequest {
    pub incident: u64,
    pub request: u64,
}

impl IncidentRequest {
    pub fn from_dashboard(raw: &DashboardIncident) -> Option<Self> {
        raw.rr_number.map(|request| Self {
            incident: raw.number,
            request,
        })
    }

    /// Full maintenance identifier for logs: `<project>:<incident>:<request>`
    pub fn display_with(&self, maintenance_project: &str) -> String {
        format!("{}:{}:{}", maintenance_project, self.incident, self.request)
    }
}

// ============================================================================
// Job-Setting Models
// ============================================================================

/// Whether a job setting belongs to a per-incident or an aggregate run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsKind {
    Incident,
    Aggregate,
}

impl SettingsKind {
    /// Dashboard endpoint that stores settings of this kind
    pub fn settings_api(&self) -> &'static str {
        match self {
            SettingsKind::Incident => "api/incident_settings",
            SettingsKind::Aggregate => "api/update_settings",
        }
    }

    /// Dashboard endpoint that serves job results of this kind
    pub fn results_api(&self) -> &'static str {
        match self {
            SettingsKind::Incident => "api/jobs/incident",
            SettingsKind::Aggregate => "api/jobs/update",
        }
    }
}

impl fmt::Display for SettingsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsKind::Incident => write!(f, "incident"),
            SettingsKind::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// Record persisted for one incident × flavor × arch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentJobSetting {
    #[serde(rename = "incident")]
    pub incident_id: u64,
    pub flavor: String,
    pub arch: String,
    pub version: String,
    #[serde(rename = "repohash")]
    pub repo_hash: String,
    pub settings: BTreeMap<String, String>,
    #[serde(rename = "withAggregate")]
    pub needs_aggregate: bool,
}

/// Record persisted for one aggregate flavor × arch build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateJobSetting {
    pub product: String,
    pub arch: String,
    pub build: String,
    #[serde(rename = "repohash")]
    pub repo_hash: String,
    pub incidents: Vec<u64>,
    pub settings: BTreeMap<String, String>,
}

/// The dashboard-persistence half of a trigger request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobSettingRecord {
    Incident(IncidentJobSetting),
    Aggregate(AggregateJobSetting),
}

impl JobSettingRecord {
    pub fn kind(&self) -> SettingsKind {
        match self {
            JobSettingRecord::Incident(_) => SettingsKind::Incident,
            JobSettingRecord::Aggregate(_) => SettingsKind::Aggregate,
        }
    }
}

/// Incident settings as read back from the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIncidentSetting {
    pub id: u64,
    #[serde(default)]
    pub incident: u64,
    pub flavor: String,
    pub arch: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "withAggregate", default)]
    pub with_aggregate: bool,
}

impl StoredIncidentSetting {
    /// Stringified settings value; numbers are stored unquoted by older runs
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).and_then(value_to_string)
    }
}

/// Aggregate settings as read back from the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAggregateSetting {
    pub id: u64,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub repohash: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl StoredAggregateSetting {
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key).and_then(value_to_string)
    }
}

fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A group of job runs sharing one settings id, as judged by the approver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobGroup {
    pub settings_id: u64,
    pub kind: SettingsKind,
    pub needs_aggregate: bool,
}

// ============================================================================
// Result Models
// ============================================================================

/// Normalized status of one test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Passed,
    Failed,
    Stopped,
    Waiting,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Map a raw openQA result to the dashboard status
    pub fn from_openqa_result(result: &str) -> Self {
        match result {
            "passed" | "softfailed" => JobStatus::Passed,
            "none" => JobStatus::Waiting,
            "timeout_exceeded" | "incomplete" | "obsoleted" | "parallel_failed" | "skipped"
            | "parallel_restarted" | "user_cancelled" | "user_restarted" => JobStatus::Stopped,
            _ => JobStatus::Failed,
        }
    }
}

/// One run result as served by the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: u64,
    pub status: JobStatus,
}

/// Reviewer comment attached to an openQA job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobComment {
    #[serde(default)]
    pub id: u64,
    pub text: String,
}

/// Outcome counters of one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }
}
