// Product metadata: parsed, normalized test definitions per product flavor

pub mod loader;

pub use loader::{load_metadata, load_single_arch, read_products, ProductArch};

use crate::errors::ConfigError;
use crate::models::ProdVer;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// YAML scalar accepted wherever the payload needs a string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => if b { "1" } else { "0" }.to_string(),
        }
    }
}

pub(crate) fn stringify(map: BTreeMap<String, Scalar>) -> BTreeMap<String, String> {
    map.into_iter().map(|(k, v)| (k, v.into())).collect()
}

/// Whether a flavor's incident runs also need the aggregate run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatePolicy {
    /// Aggregate always required
    Always,
    /// Aggregate suppressed by payload key membership
    Suppress {
        positive: BTreeSet<String>,
        negative: BTreeSet<String>,
    },
}

impl AggregatePolicy {
    /// Decide from the payload keys; the branches overlap and are kept as deployed
    pub fn needs_aggregate<'a, I>(&self, payload_keys: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (positive, negative) = match self {
            AggregatePolicy::Always => return true,
            AggregatePolicy::Suppress { positive, negative } => (positive, negative),
        };
        let keys: BTreeSet<&str> = payload_keys.into_iter().collect();
        let hits = |set: &BTreeSet<String>| set.iter().any(|k| keys.contains(k.as_str()));

        let mut needed = true;
        if !positive.is_empty() && hits(positive) {
            needed = false;
        }
        if !negative.is_empty() && !hits(negative) {
            needed = false;
        }
        if !(!negative.is_empty() && !positive.is_empty()) {
            needed = false;
        }
        needed
    }
}

/// One incident flavor of a product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorConfig {
    pub name: String,
    pub architectures: BTreeSet<String>,
    pub issue_map: BTreeMap<String, ProdVer>,
    pub required_packages: Option<BTreeSet<String>>,
    pub excluded_packages: Option<BTreeSet<String>>,
    pub required_issues: Option<BTreeSet<String>>,
    pub aggregate_policy: AggregatePolicy,
    pub priority_override: Option<i64>,
    pub params_expand: BTreeMap<String, String>,
}

/// Incident-kind test definition of one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentsConfig {
    pub product: String,
    pub version: String,
    pub distri: String,
    pub extra_settings: BTreeMap<String, String>,
    pub flavors: BTreeMap<String, FlavorConfig>,
    /// Packages built for one arch only; they never need the aggregate
    pub single_arch_packages: BTreeSet<String>,
}

/// Aggregate-kind test definition of one product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateConfig {
    pub product: String,
    pub version: String,
    pub distri: String,
    pub extra_settings: BTreeMap<String, String>,
    pub flavor: String,
    pub architectures: BTreeSet<String>,
    pub onetime: bool,
    pub test_issues: BTreeMap<String, ProdVer>,
}

/// A product config record is either incident-kind or aggregate-kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductConfig {
    Incidents(IncidentsConfig),
    Aggregate(AggregateConfig),
}

impl ProductConfig {
    pub fn product(&self) -> &str {
        match self {
            ProductConfig::Incidents(c) => &c.product,
            ProductConfig::Aggregate(c) => &c.product,
        }
    }
}

// ============================================================================
// Raw YAML shapes
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawProductFile {
    pub product: Option<String>,
    pub settings: Option<BTreeMap<String, Scalar>>,
    pub incidents: Option<RawIncidents>,
    pub aggregate: Option<RawAggregate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawIncidents {
    #[serde(rename = "FLAVOR")]
    pub flavors: BTreeMap<String, RawFlavor>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawFlavor {
    #[serde(default)]
    pub archs: Vec<String>,
    #[serde(default)]
    pub issues: BTreeMap<String, String>,
    pub packages: Option<Vec<String>>,
    pub excluded_packages: Option<Vec<String>>,
    pub required_issues: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub aggregate_job: bool,
    #[serde(default)]
    pub aggregate_check_true: Vec<String>,
    #[serde(default)]
    pub aggregate_check_false: Vec<String>,
    pub override_priority: Option<i64>,
    #[serde(default)]
    pub params_expand: BTreeMap<String, Scalar>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAggregate {
    #[serde(rename = "FLAVOR")]
    pub flavor: String,
    #[serde(default)]
    pub archs: Vec<String>,
    #[serde(default)]
    pub onetime: bool,
    pub test_issues: Option<BTreeMap<String, String>>,
}

fn default_true() -> bool {
    true
}

fn parse_issue_map(raw: BTreeMap<String, String>) -> Result<BTreeMap<String, ProdVer>, ConfigError> {
    raw.into_iter()
        .map(|(issue, value)| match value.parse::<ProdVer>() {
            Ok(prodver) => Ok((issue, prodver)),
            Err(_) => Err(ConfigError::InvalidIssueChannel { issue, value }),
        })
        .collect()
}

/// Product-level settings shared by both config kinds
#[derive(Debug, Clone)]
pub(crate) struct ProductSettings {
    pub product: String,
    pub version: String,
    pub distri: String,
    pub extra_settings: BTreeMap<String, String>,
}

impl ProductSettings {
    pub fn from_raw(product: String, settings: BTreeMap<String, Scalar>) -> Result<Self, ConfigError> {
        let extra_settings = stringify(settings);
        let required = |key: &str| {
            extra_settings
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingKey {
                    key: key.to_string(),
                    context: format!("{} settings", product),
                })
        };
        let version = required("VERSION")?;
        let distri = required("DISTRI")?;

        Ok(Self {
            product,
            version,
            distri,
            extra_settings,
        })
    }
}

impl FlavorConfig {
    pub(crate) fn from_raw(name: String, raw: RawFlavor) -> Result<Self, ConfigError> {
        if raw.archs.is_empty() {
            return Err(ConfigError::NoArchitectures { flavor: name });
        }

        let aggregate_policy = if raw.aggregate_job {
            AggregatePolicy::Always
        } else {
            AggregatePolicy::Suppress {
                positive: raw.aggregate_check_true.into_iter().collect(),
                negative: raw.aggregate_check_false.into_iter().collect(),
            }
        };

        Ok(Self {
            architectures: raw.archs.into_iter().collect(),
            issue_map: parse_issue_map(raw.issues)?,
            required_packages: raw.packages.map(|p| p.into_iter().collect()),
            excluded_packages: raw.excluded_packages.map(|p| p.into_iter().collect()),
            required_issues: raw.required_issues.map(|p| p.into_iter().collect()),
            aggregate_policy,
            // zero means unset
            priority_override: raw.override_priority.filter(|p| *p != 0),
            params_expand: stringify(raw.params_expand),
            name,
        })
    }
}

impl IncidentsConfig {
    pub(crate) fn from_raw(
        settings: &ProductSettings,
        raw: RawIncidents,
        single_arch_packages: BTreeSet<String>,
    ) -> Result<Self, ConfigError> {
        let flavors = raw
            .flavors
            .into_iter()
            .map(|(name, flavor)| Ok((name.clone(), FlavorConfig::from_raw(name, flavor)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        Ok(Self {
            product: settings.product.clone(),
            version: settings.version.clone(),
            distri: settings.distri.clone(),
            extra_settings: settings.extra_settings.clone(),
            flavors,
            single_arch_packages,
        })
    }
}

impl AggregateConfig {
    pub(crate) fn from_raw(settings: &ProductSettings, raw: RawAggregate) -> Result<Self, ConfigError> {
        let test_issues = raw.test_issues.ok_or_else(|| ConfigError::NoTestIssues {
            product: settings.product.clone(),
        })?;
        if raw.archs.is_empty() {
            return Err(ConfigError::NoArchitectures {
                flavor: raw.flavor,
            });
        }

        Ok(Self {
            product: settings.product.clone(),
            version: settings.version.clone(),
            distri: settings.distri.clone(),
            extra_settings: settings.extra_settings.clone(),
            flavor: raw.flavor,
            architectures: raw.archs.into_iter().collect(),
            onetime: raw.onetime,
            test_issues: parse_issue_map(test_issues)?,
        })
    }
}
