// Trigger payload: ordered string map posted to the orchestrator and persisted
// with the job setting. Built as a fixed sequence of stages, last write wins.

use crate::errors::PayloadError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// Keys computed by the scheduling engine
pub const ARCH: &str = "ARCH";
pub const FLAVOR: &str = "FLAVOR";
pub const VERSION: &str = "VERSION";
pub const DISTRI: &str = "DISTRI";
pub const BUILD: &str = "BUILD";
pub const REPOHASH: &str = "REPOHASH";
pub const INCIDENT_ID: &str = "INCIDENT_ID";
pub const INCIDENT_REPO: &str = "INCIDENT_REPO";
pub const RRID: &str = "RRID";
pub const KGRAFT: &str = "KGRAFT";
pub const PRIORITY: &str = "_PRIORITY";
pub const OBSOLETE: &str = "_OBSOLETE";
pub const ONLY_OBSOLETE_SAME_BUILD: &str = "_ONLY_OBSOLETE_SAME_BUILD";
pub const DEPRIORITIZE_BUILD: &str = "_DEPRIORITIZEBUILD";
pub const CI_JOB_URL: &str = "__CI_JOB_URL";
pub const SMELT_INCIDENT_URL: &str = "__SMELT_INCIDENT_URL";
pub const DASHBOARD_INCIDENT_URL: &str = "__DASHBOARD_INCIDENT_URL";

// Dynamic image lookup directives and the keys they resolve to
pub const TOOLS_IMAGE_QUERY: &str = "PUBLIC_CLOUD_TOOLS_IMAGE_QUERY";
pub const TOOLS_IMAGE_BASE: &str = "PUBLIC_CLOUD_TOOLS_IMAGE_BASE";
pub const IMAGE_REGEX: &str = "PUBLIC_CLOUD_IMAGE_REGEX";
pub const IMAGE_LOCATION: &str = "PUBLIC_CLOUD_IMAGE_LOCATION";
pub const PINT_QUERY: &str = "PUBLIC_CLOUD_PINT_QUERY";
pub const PINT_NAME: &str = "PUBLIC_CLOUD_PINT_NAME";
pub const PINT_FIELD: &str = "PUBLIC_CLOUD_PINT_FIELD";
pub const PINT_REGION: &str = "PUBLIC_CLOUD_PINT_REGION";
pub const IMAGE_ID: &str = "PUBLIC_CLOUD_IMAGE_ID";
pub const IMAGE_NAME: &str = "PUBLIC_CLOUD_IMAGE_NAME";
pub const IMAGE_PUBLISHED_ON: &str = "PUBLIC_CLOUD_IMAGE_PUBLISHEDON";

/// Directives that must be resolved before a payload is posted
pub const DIRECTIVES: [&str; 3] = [TOOLS_IMAGE_QUERY, IMAGE_REGEX, PINT_QUERY];

const INCIDENT_REQUIRED: [&str; 8] = [
    ARCH,
    FLAVOR,
    VERSION,
    DISTRI,
    BUILD,
    REPOHASH,
    INCIDENT_ID,
    INCIDENT_REPO,
];

const AGGREGATE_REQUIRED: [&str; 6] = [ARCH, FLAVOR, VERSION, DISTRI, BUILD, REPOHASH];

/// Trigger kind a payload is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Incident,
    Aggregate,
}

impl PayloadKind {
    /// Keys every payload of this kind must carry, non-empty
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            PayloadKind::Incident => &INCIDENT_REQUIRED,
            PayloadKind::Aggregate => &AGGREGATE_REQUIRED,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Incident => write!(f, "incident"),
            PayloadKind::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// Ordered string-keyed trigger payload
///
/// Every stage consumes the payload and returns a new one, so a stage can
/// never observe a later stage's writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    #[serde(skip)]
    kind: PayloadKind,
    #[serde(flatten)]
    entries: BTreeMap<String, String>,
}

impl Payload {
    pub fn new(kind: PayloadKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Set one key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Set one key when a value is present
    pub fn with_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    /// Merge a whole stage; its entries win over existing ones
    pub fn merge<K, V, I>(mut self, stage: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in stage {
            self.entries.insert(key.into(), value.into());
        }
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.entries.remove(key);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries
    }

    /// Check the required keys of this payload's kind and that no directive is left
    pub fn validate(self) -> Result<Self, PayloadError> {
        for key in self.kind.required_keys() {
            match self.entries.get(*key) {
                None => {
                    return Err(PayloadError::MissingKey {
                        kind: self.kind.to_string(),
                        key: key.to_string(),
                    })
                }
                Some(value) if value.is_empty() => {
                    return Err(PayloadError::EmptyValue {
                        kind: self.kind.to_string(),
                        key: key.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        if let Some(key) = DIRECTIVES.iter().find(|d| self.entries.contains_key(**d)) {
            return Err(PayloadError::UnresolvedDirective {
                key: key.to_string(),
            });
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_aggregate() -> Payload {
        Payload::new(PayloadKind::Aggregate)
            .with(ARCH, "x86_64")
            .with(FLAVOR, "Server-DVD-Updates")
            .with(VERSION, "15-SP4")
            .with(DISTRI, "sle")
            .with(BUILD, "20240101-1")
            .with(REPOHASH, "abc")
    }

    #[test]
    fn test_later_stage_wins() {
        let payload = Payload::new(PayloadKind::Incident)
            .merge([("A", "1"), ("B", "1")])
            .merge([("B", "2")])
            .with("C", "3");
        assert_eq!(payload.get("A"), Some("1"));
        assert_eq!(payload.get("B"), Some("2"));
        assert_eq!(payload.get("C"), Some("3"));
    }

    #[test]
    fn test_keys_are_ordered() {
        let payload = Payload::new(PayloadKind::Incident)
            .with("ZZ", "1")
            .with("AA", "2");
        let keys: Vec<&str> = payload.keys().collect();
        assert_eq!(keys, vec!["AA", "ZZ"]);
    }

    #[test]
    fn test_validate_accepts_complete_payload() {
        assert!(complete_aggregate().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let err = complete_aggregate().without(REPOHASH).validate().unwrap_err();
        assert_eq!(
            err,
            PayloadError::MissingKey {
                kind: "aggregate".to_string(),
                key: REPOHASH.to_string()
            }
        );
    }

    #[test]
    fn test_validate_rejects_empty_value() {
        let err = complete_aggregate().with(BUILD, "").validate().unwrap_err();
        assert!(matches!(err, PayloadError::EmptyValue { .. }));
    }

    #[test]
    fn test_validate_rejects_unresolved_directive() {
        let err = complete_aggregate()
            .with(PINT_QUERY, "https://pint/v1/amazon/images/")
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            PayloadError::UnresolvedDirective {
                key: PINT_QUERY.to_string()
            }
        );
    }

    #[test]
    fn test_incident_kind_requires_incident_keys() {
        let payload = complete_aggregate();
        let incident = Payload::new(PayloadKind::Incident).merge(payload.into_map());
        assert!(matches!(
            incident.validate(),
            Err(PayloadError::MissingKey { key, .. }) if key == INCIDENT_ID
        ));
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let json = serde_json::to_value(complete_aggregate()).unwrap();
        assert_eq!(json["ARCH"], "x86_64");
        assert!(json.get("kind").is_none());
    }
}
