//! Collectors turn one kind of source into samples.
//!
//! Every collector runs the same [`sweep`]: enumerate each root, convert each
//! artifact, log and skip what fails. Collectors hold no state between sweeps.
//!
//! # Submodules
//!
//! - `file` - certificate files on disk
//! - `secret` - Kubernetes TLS secrets
//! - `certificate` - cert-manager Certificate resources
//! - `token` - Vault token files

pub mod certificate;
pub mod file;
pub mod secret;
pub mod token;

use std::collections::BTreeMap;

use crate::decoder::CertificateDecoder;
use crate::error::Skipped;
use crate::metrics::{MetricShape, Sample};
use crate::model::RawArtifact;
use crate::source::ArtifactSource;

pub use certificate::CertificateCollector;
pub use file::FileCollector;
pub use secret::SecretCollector;
pub use token::TokenCollector;

/// A producer of expiry samples.
///
/// `collect` must not fail: every problem is logged and the affected artifact
/// or root contributes no sample.
pub trait Collector: Send + Sync {
    /// Short name used in logs, e.g. `"file"`.
    fn name(&self) -> &'static str;

    /// Shapes of every metric this collector can emit.
    fn describe(&self) -> Vec<&'static MetricShape>;

    fn collect(&self) -> Vec<Sample>;
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub samples: Vec<Sample>,
    pub skipped: Vec<Skipped>,
    pub roots_succeeded: usize,
    /// Display names of the roots that could not be enumerated
    pub failed_roots: Vec<String>,
}

impl SweepReport {
    /// Skips that point at a broken artifact rather than an expected one.
    pub fn failures(&self) -> usize {
        self.skipped.iter().filter(|s| s.reason.is_failure()).count()
    }

    fn log_summary(&self, collector: &str) {
        if self.failed_roots.is_empty() {
            return;
        }
        if self.roots_succeeded == 0 {
            tracing::error!(
                collector,
                failed = ?self.failed_roots,
                "could not enumerate any configured source"
            );
        } else {
            tracing::info!(
                collector,
                succeeded = self.roots_succeeded,
                failed = ?self.failed_roots,
                "some configured sources could not be enumerated"
            );
        }
    }
}

/// Enumerates every root of `source` and converts each artifact.
///
/// A root that fails to enumerate is logged and the next one is tried. An
/// artifact that fails to convert is logged and skipped.
pub fn sweep<S, F>(collector: &str, source: &S, mut convert: F) -> SweepReport
where
    S: ArtifactSource,
    F: FnMut(S::Artifact) -> Result<Vec<Sample>, Skipped>,
{
    tracing::info!(collector, "start collecting metrics");
    let mut report = SweepReport::default();

    for root in source.roots() {
        let artifacts = match source.enumerate(&root) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::error!(collector, root = %root, error = %e, "could not enumerate source");
                report.failed_roots.push(root.to_string());
                continue;
            }
        };
        report.roots_succeeded += 1;

        for artifact in artifacts {
            let converted = match artifact {
                Ok(artifact) => convert(artifact),
                Err(skipped) => Err(skipped),
            };
            match converted {
                Ok(samples) => report.samples.extend(samples),
                Err(skipped) => {
                    skipped.log(collector);
                    report.skipped.push(skipped);
                }
            }
        }
    }

    report.log_summary(collector);
    tracing::info!(
        collector,
        samples = report.samples.len(),
        skipped = report.skipped.len(),
        failures = report.failures(),
        "finished collecting metrics"
    );
    report
}

/// Decodes `raw` and builds one sample per certificate.
///
/// `labels` take precedence over what the decoder extracted.
pub(crate) fn certificate_samples(
    collector: &str,
    decoder: &CertificateDecoder,
    shape: &'static MetricShape,
    raw: RawArtifact,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<Sample>, Skipped> {
    let certificates = match decoder.decode(&raw.payload) {
        Ok(certificates) => certificates,
        Err(reason) => return Err(Skipped::new(raw.reference, reason)),
    };

    let samples = certificates
        .into_iter()
        .map(|certificate| {
            tracing::debug!(
                collector,
                artifact = %raw.reference,
                issuer = %certificate.issuer_name,
                not_after = certificate.not_after,
                "adding to the metrics"
            );
            let certificate = labels
                .iter()
                .fold(certificate, |c, (name, value)| c.with_label(name, value.clone()));
            shape.sample(certificate.not_after as f64, &certificate.subject_labels)
        })
        .collect();
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExporterError, SkipReason};
    use crate::metrics::{LABEL_PATH, NOT_AFTER};
    use crate::model::ArtifactRef;
    use crate::source::Artifacts;
    use crate::testutil::certificate_pem;
    use std::path::PathBuf;

    /// Roots are numbers; odd roots fail, even roots yield their number.
    struct NumberSource {
        roots: Vec<u32>,
    }

    impl ArtifactSource for NumberSource {
        type Root = u32;
        type Artifact = u32;

        fn roots(&self) -> Vec<u32> {
            self.roots.clone()
        }

        fn enumerate<'a>(&'a self, root: &u32) -> Result<Artifacts<'a, u32>, ExporterError> {
            if root % 2 == 1 {
                return Err(ExporterError::SourceUnavailable {
                    source_name: root.to_string(),
                    details: "odd".to_string(),
                });
            }
            let skipped = Skipped::new(
                ArtifactRef::File(PathBuf::from(format!("/{}", root))),
                SkipReason::NotACertificate,
            );
            Ok(Box::new(vec![Ok(*root), Err(skipped)].into_iter()))
        }
    }

    fn number_sample(n: u32) -> Result<Vec<Sample>, Skipped> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_PATH.to_string(), n.to_string());
        Ok(vec![NOT_AFTER.sample(f64::from(n), &labels)])
    }

    #[test]
    fn test_sweep_continues_past_failed_roots() {
        let source = NumberSource {
            roots: vec![1, 2, 3, 4],
        };
        let report = sweep("numbers", &source, number_sample);

        assert_eq!(report.roots_succeeded, 2);
        assert_eq!(report.failed_roots, vec!["1".to_string(), "3".to_string()]);
        let values: Vec<f64> = report.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2.0, 4.0]);
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_sweep_all_roots_failed() {
        let source = NumberSource { roots: vec![1, 3] };
        let report = sweep("numbers", &source, number_sample);
        assert_eq!(report.roots_succeeded, 0);
        assert!(report.samples.is_empty());
        assert_eq!(report.failed_roots.len(), 2);
    }

    #[test]
    fn test_sweep_conversion_failure_is_skipped() {
        let source = NumberSource { roots: vec![2] };
        let report = sweep("numbers", &source, |n| {
            Err(Skipped::new(
                ArtifactRef::File(PathBuf::from(format!("/{}", n))),
                SkipReason::DecodeError("bad".to_string()),
            ))
        });
        assert!(report.samples.is_empty());
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn test_certificate_samples_prefer_source_labels() {
        let raw = RawArtifact::new(
            ArtifactRef::File(PathBuf::from("/certs/a.crt")),
            certificate_pem("a.example.com", 1_735_689_600).into_bytes(),
        );
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_PATH.to_string(), "/certs/a.crt".to_string());

        let samples =
            certificate_samples("file", &CertificateDecoder::new(), &NOT_AFTER, raw, &labels)
                .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 1_735_689_600.0);
        assert_eq!(samples[0].label(LABEL_PATH), Some("/certs/a.crt"));
    }
}
