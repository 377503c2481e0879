use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DossierError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited by {source_id}: retry after {retry_after_secs}s")]
    RateLimited {
        source_id: String,
        retry_after_secs: u64,
    },

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid credentials for source {0}")]
    CredentialsInvalid(String),

    #[error("Malformed response from {source_id}: {detail}")]
    MalformedResponse { source_id: String, detail: String },

    #[error("Security rejected: {0}")]
    SecurityRejected(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DossierError>;

/// Machine-readable classification of an error, used for retry decisions
/// and for the `errors[]` entries on an investigation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    NotReady,
    Unauthorized,
    RateLimited,
    Timeout,
    UpstreamUnavailable,
    CredentialsInvalid,
    MalformedResponse,
    SecurityRejected,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Transient kinds are eligible for scheduler retry. `RateLimited` is
    /// handled separately through the rate-limit controller's backoff
    /// window rather than the generic retry loop.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::UpstreamUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::CredentialsInvalid => "credentials_invalid",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::SecurityRejected => "security_rejected",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl DossierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DossierError::Validation(_) => ErrorKind::Validation,
            DossierError::NotFound(_) => ErrorKind::NotFound,
            DossierError::NotReady(_) => ErrorKind::NotReady,
            DossierError::Unauthorized(_) => ErrorKind::Unauthorized,
            DossierError::RateLimited { .. } => ErrorKind::RateLimited,
            DossierError::Timeout(_) => ErrorKind::Timeout,
            DossierError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            DossierError::CredentialsInvalid(_) => ErrorKind::CredentialsInvalid,
            DossierError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            DossierError::SecurityRejected(_) => ErrorKind::SecurityRejected,
            DossierError::Cancelled => ErrorKind::Cancelled,
            DossierError::Io(_)
            | DossierError::Serialization(_)
            | DossierError::Cache(_)
            | DossierError::Store(_)
            | DossierError::Graph(_)
            | DossierError::Configuration(_)
            | DossierError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DossierError::Timeout(std::time::Duration::from_secs(30)).is_transient());
        assert!(DossierError::UpstreamUnavailable("conn refused".into()).is_transient());
        assert!(!DossierError::CredentialsInvalid("github".into()).is_transient());
        assert!(!DossierError::MalformedResponse {
            source_id: "crtsh".into(),
            detail: "truncated json".into(),
        }
        .is_transient());
        // rate_limited goes through the backoff window, not the retry loop
        assert!(!DossierError::RateLimited {
            source_id: "hibp".into(),
            retry_after_secs: 60,
        }
        .is_transient());
    }

    #[test]
    fn test_kind_serialization() {
        let kind = ErrorKind::UpstreamUnavailable;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"upstream_unavailable\"");
        assert_eq!(kind.to_string(), "upstream_unavailable");
    }
}
