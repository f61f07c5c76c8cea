// Error handling framework
// Every error here is recoverable per incident or per candidate; only bootstrap
// failures in the binaries abort a run.

use thiserror::Error;

/// Product metadata errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid YAML in {path}: {reason}")]
    InvalidYaml { path: String, reason: String },

    #[error("Missing required key '{key}' in {context}")]
    MissingKey { key: String, context: String },

    #[error("Invalid issue channel '{value}' for {issue}: expected 'product:version'")]
    InvalidIssueChannel { issue: String, value: String },

    #[error("Flavor {flavor} has no architectures")]
    NoArchitectures { flavor: String },

    #[error("No 'test_issues' in {product} aggregate config")]
    NoTestIssues { product: String },
}

/// Transport errors raised by the HTTP collaborators
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("HTTP request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("HTTP request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Client setup failed: {0}")]
    Setup(String),
}

impl ClientError {
    /// HTTP status code, when the collaborator answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request { .. } => true,
            ClientError::Status { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            ClientError::Decode { .. } | ClientError::Setup(_) => false,
        }
    }
}

/// Trigger payload validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Missing required key {key} in {kind} payload")]
    MissingKey { kind: String, key: String },

    #[error("Empty value for required key {key} in {kind} payload")]
    EmptyValue { kind: String, key: String },

    #[error("Unresolved directive {key} left in payload")]
    UnresolvedDirective { key: String },
}

/// Dynamic image lookup errors
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Directive {directive} yielded no value for query '{query}'")]
    NoValue { directive: String, query: String },

    #[error("Directive {directive} has an invalid argument: {reason}")]
    InvalidArgument { directive: String, reason: String },

    #[error("Directive {directive} lookup failed: {source}")]
    Lookup {
        directive: String,
        #[source]
        source: ClientError,
    },
}

/// Incident normalization errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IncidentError {
    #[error("Incident {0} has no usable repository channel")]
    NoRepository(u64),

    #[error("Incident {0} has no packages")]
    NoPackages(u64),
}

/// Approval errors
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Job setting {settings_id} has no results for incident {incident}")]
    NoResults { settings_id: u64, incident: u64 },

    #[error("Incident {incident} has no {kind} job settings")]
    NoSettings { incident: u64, kind: String },

    #[error("Review transition for request {request} failed: {source}")]
    Review {
        request: u64,
        #[source]
        source: ClientError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_status() {
        let err = ClientError::Status {
            url: "http://dashboard/api".to_string(),
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.status(), Some(403));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        let err = ClientError::Request {
            url: "http://dashboard/api".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status(), None);

        let unavailable = ClientError::Status {
            url: "http://dashboard/api".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidIssueChannel {
            issue: "OS_TEST_ISSUES".to_string(),
            value: "SLES".to_string(),
        };
        assert!(err.to_string().contains("product:version"));
    }

    #[test]
    fn test_no_results_display() {
        let err = ApprovalError::NoResults {
            settings_id: 7,
            incident: 100,
        };
        assert_eq!(
            err.to_string(),
            "Job setting 7 has no results for incident 100"
        );
    }
}
