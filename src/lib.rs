//! Certificate and token expiry exporter.
//!
//! Collectors walk certificate sources (files on disk, Kubernetes TLS secrets,
//! cert-manager Certificate resources, Vault token files), pull the expiry out
//! of every artifact they find and hand back gauge samples holding Unix
//! timestamps. A [`Registry`] runs all collectors on every scrape and exposes
//! the samples in the Prometheus text format.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use cert_exporter::collector::{Collector, FileCollector};
//! use cert_exporter::config::FileCollectorConfig;
//! use cert_exporter::fs::OsFilesystem;
//!
//! let collector = FileCollector::new(
//!     Arc::new(OsFilesystem),
//!     &FileCollectorConfig {
//!         paths: vec![PathBuf::from("/etc/kubernetes/ssl")],
//!         decode_bundles: false,
//!     },
//! );
//! for sample in collector.collect() {
//!     println!("{} {:?} {}", sample.metric_name, sample.label_values, sample.value);
//! }
//! ```

pub mod collector;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fs;
pub mod kube;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod server;
pub mod source;
pub mod token;

#[cfg(test)]
mod testutil;

pub use collector::{Collector, SweepReport};
pub use config::{Config, ConfigError, Settings};
pub use decoder::CertificateDecoder;
pub use error::{ExporterError, SkipReason, Skipped};
pub use metrics::{MetricShape, Sample};
pub use model::{ArtifactRef, DecodedCertificate, RawArtifact};
pub use registry::Registry;
pub use token::{TokenExpiry, TokenFormat, TokenInspector, TokenIntrospector};
