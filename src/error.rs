//! Error types for the vulnerability-resolution pipeline.
//!
//! Every error here is recoverable at the scan level except
//! [`ScanError::Cancelled`]: manifest errors skip one file, source errors
//! degrade one source for one dependency, version errors push the classifier
//! toward the cautious answer.

use std::time::Duration;

use crate::model::SourceKind;

/// A manifest could not be read or understood.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("manifest {path} is too large ({size} bytes, max {max})")]
    TooLarge { path: String, size: u64, max: u64 },
}

impl ManifestError {
    pub fn parse(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A vulnerability source failed to answer a query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Network failure or 5xx response.
    #[error("{source_kind} unavailable: {reason}")]
    Unavailable {
        source_kind: SourceKind,
        reason: String,
    },

    /// HTTP 429 or an equivalent throttling signal.
    #[error("{source_kind} rate limited")]
    RateLimited {
        source_kind: SourceKind,
        retry_after: Option<Duration>,
    },

    /// The body did not match the expected schema.
    #[error("{source_kind} returned a malformed response: {reason}")]
    MalformedResponse {
        source_kind: SourceKind,
        reason: String,
    },
}

impl SourceError {
    /// Whether the retry loop should try this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::RateLimited { .. })
    }

    pub fn source_kind(&self) -> SourceKind {
        match self {
            Self::Unavailable { source_kind, .. }
            | Self::RateLimited { source_kind, .. }
            | Self::MalformedResponse { source_kind, .. } => *source_kind,
        }
    }
}

/// A declared version or range could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("ambiguous version range '{0}'")]
    AmbiguousVersionRange(String),
}

/// Scan-level failures. Only cancellation aborts a scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan cancelled")]
    Cancelled,

    #[error("project root {0} does not exist or is not a directory")]
    InvalidRoot(String),

    #[error("failed to build http client: {0}")]
    HttpClient(String),
}
