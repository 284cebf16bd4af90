//! Values that flow through a single sweep.
//!
//! Nothing here outlives one call to a collector: references are built while
//! enumerating, payloads are read once and dropped after decoding.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Identifies one candidate artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    /// A certificate file found while walking a directory
    File(PathBuf),
    /// One data key of a Kubernetes secret
    SecretKey {
        namespace: String,
        name: String,
        key: String,
    },
    /// A Kubernetes custom resource
    CustomResource { namespace: String, name: String },
    /// A file holding a Vault token
    TokenFile(PathBuf),
}

impl ArtifactRef {
    /// The value used for `path` labels.
    pub fn path_label(&self) -> String {
        match self {
            Self::File(path) | Self::TokenFile(path) => path.display().to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) | Self::TokenFile(path) => write!(f, "{}", path.display()),
            Self::SecretKey {
                namespace,
                name,
                key,
            } => write!(f, "{}/{}[{}]", namespace, name, key),
            Self::CustomResource { namespace, name } => write!(f, "{}/{}", namespace, name),
        }
    }
}

/// An artifact reference together with its raw bytes.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub reference: ArtifactRef,
    pub payload: Vec<u8>,
}

impl RawArtifact {
    pub fn new(reference: ArtifactRef, payload: Vec<u8>) -> Self {
        RawArtifact { reference, payload }
    }
}

/// Expiry and identity of one parsed certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCertificate {
    /// Not-valid-after, seconds since the Unix epoch (UTC)
    pub not_after: i64,
    /// Issuer distinguished name, most specific attribute first
    pub issuer_name: String,
    /// Extra metadata; collectors merge their own labels into it
    pub subject_labels: BTreeMap<String, String>,
}

impl DecodedCertificate {
    pub fn with_label(mut self, name: &str, value: impl Into<String>) -> Self {
        self.subject_labels.insert(name.to_string(), value.into());
        self
    }
}
