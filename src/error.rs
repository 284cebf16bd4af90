//! Error types for certificate collection.
//!
//! Two families live here. [`ExporterError`] is a real failure: a collaborator
//! could not be reached, a configuration value was rejected, a payload could not
//! be decoded. [`SkipReason`] classifies why a single artifact produced no sample;
//! it is only ever logged, never surfaced as a metric.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::model::ArtifactRef;

/// Error type for collection failures.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Invalid configuration detected while building a collector or client
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Why the configuration was rejected
        reason: String,
    },

    /// A configured root (directory, namespace, API) could not be enumerated
    #[error("source {source_name} unavailable: {details}")]
    SourceUnavailable {
        /// The directory path or namespace that failed
        source_name: String,
        /// What went wrong
        details: String,
    },

    /// A payload was present but could not be decoded
    #[error("decode error: {reason}")]
    Decode {
        /// Description of what went wrong
        reason: String,
    },

    /// A call to the Kubernetes API or the token introspection service failed
    #[error("remote call to {endpoint} failed: {details}")]
    RemoteCall {
        /// The URL or endpoint name that was called
        endpoint: String,
        /// Transport or status details
        details: String,
    },

    /// Generic I/O error
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: io::Error,
    },

    /// Metric family construction failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<reqwest::Error> for ExporterError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self::RemoteCall {
            endpoint,
            details: e.to_string(),
        }
    }
}

/// Why an artifact did not yield a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No PEM block found; expected for arbitrary files in a walked tree
    NotACertificate,
    /// The artifact is a private key and has no expiry
    IsPrivateKey,
    /// The artifact vanished or the expected key is absent
    PathMissing,
    /// The payload could not be parsed
    DecodeError(String),
    /// The artifact or its source could not be read
    SourceUnavailable(String),
    /// The token is valid and never expires
    NoExpiration,
    /// The token introspection service reported itself unhealthy
    ServiceUnhealthy(String),
}

/// Log level a skip is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl SkipReason {
    pub fn severity(&self) -> Severity {
        match self {
            Self::NotACertificate | Self::PathMissing => Severity::Debug,
            Self::IsPrivateKey | Self::NoExpiration => Severity::Info,
            Self::DecodeError(_) | Self::ServiceUnhealthy(_) => Severity::Warn,
            Self::SourceUnavailable(_) => Severity::Error,
        }
    }

    /// Whether this skip counts as a failure rather than an expected outcome.
    pub fn is_failure(&self) -> bool {
        matches!(self.severity(), Severity::Warn | Severity::Error)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotACertificate => write!(f, "no PEM block found"),
            Self::IsPrivateKey => write!(f, "private key, not adding to the metrics"),
            Self::PathMissing => write!(f, "path or key missing"),
            Self::DecodeError(details) => write!(f, "could not be parsed: {}", details),
            Self::SourceUnavailable(details) => write!(f, "unavailable: {}", details),
            Self::NoExpiration => write!(f, "token does not expire"),
            Self::ServiceUnhealthy(details) => write!(f, "introspection service unhealthy: {}", details),
        }
    }
}

impl From<ExporterError> for SkipReason {
    fn from(e: ExporterError) -> Self {
        match e {
            ExporterError::Decode { reason } => Self::DecodeError(reason),
            other => Self::SourceUnavailable(other.to_string()),
        }
    }
}

/// An artifact that produced no sample, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub artifact: ArtifactRef,
    pub reason: SkipReason,
}

impl Skipped {
    pub fn new(artifact: ArtifactRef, reason: SkipReason) -> Self {
        Skipped { artifact, reason }
    }

    /// Emits the skip at the level its reason calls for.
    pub fn log(&self, collector: &str) {
        let artifact = &self.artifact;
        let reason = &self.reason;
        match reason.severity() {
            Severity::Debug => {
                tracing::debug!(collector, %artifact, "skipping: {}", reason)
            }
            Severity::Info => tracing::info!(collector, %artifact, "skipping: {}", reason),
            Severity::Warn => tracing::warn!(collector, %artifact, "skipping: {}", reason),
            Severity::Error => {
                tracing::error!(collector, %artifact, "skipping: {}", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_display() {
        let err = ExporterError::SourceUnavailable {
            source_name: "/etc/certs".to_string(),
            details: "directory does not exist".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "source /etc/certs unavailable: directory does not exist"
        );
    }

    #[test]
    fn test_skip_severity() {
        assert_eq!(SkipReason::NotACertificate.severity(), Severity::Debug);
        assert_eq!(SkipReason::IsPrivateKey.severity(), Severity::Info);
        assert_eq!(SkipReason::NoExpiration.severity(), Severity::Info);
        assert_eq!(
            SkipReason::DecodeError("bad".to_string()).severity(),
            Severity::Warn
        );
        assert_eq!(
            SkipReason::SourceUnavailable("gone".to_string()).severity(),
            Severity::Error
        );
        assert!(!SkipReason::IsPrivateKey.is_failure());
        assert!(SkipReason::ServiceUnhealthy("sealed".to_string()).is_failure());
    }

    #[test]
    fn test_skip_from_exporter_error() {
        let reason: SkipReason = ExporterError::Decode {
            reason: "truncated".to_string(),
        }
        .into();
        assert_eq!(reason, SkipReason::DecodeError("truncated".to_string()));

        let reason: SkipReason = ExporterError::from(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .into();
        assert!(matches!(reason, SkipReason::SourceUnavailable(_)));
    }

    #[test]
    fn test_skipped_log_does_not_panic() {
        let skipped = Skipped::new(
            ArtifactRef::File(PathBuf::from("/tmp/key.pem")),
            SkipReason::IsPrivateKey,
        );
        skipped.log("file");
    }
}
