use std::sync::Arc;

use crate::collector::{certificate_samples, sweep, Collector, SweepReport};
use crate::config::SecretCollectorConfig;
use crate::decoder::CertificateDecoder;
use crate::kube::KubeApi;
use crate::metrics::{MetricShape, Sample, SECRET_NOT_AFTER};
use crate::source::SecretSource;

/// Certificates stored in `kubernetes.io/tls` secrets.
pub struct SecretCollector {
    source: SecretSource,
    decoder: CertificateDecoder,
}

impl SecretCollector {
    pub fn new(api: Arc<dyn KubeApi>, config: &SecretCollectorConfig) -> Self {
        SecretCollector {
            source: SecretSource::new(api, config.namespaces.clone()),
            decoder: CertificateDecoder::new(),
        }
    }

    pub fn sweep(&self) -> SweepReport {
        sweep(self.name(), &self.source, |artifact| {
            certificate_samples(
                self.name(),
                &self.decoder,
                &SECRET_NOT_AFTER,
                artifact.raw,
                &artifact.labels,
            )
        })
    }
}

impl Collector for SecretCollector {
    fn name(&self) -> &'static str {
        "secret"
    }

    fn describe(&self) -> Vec<&'static MetricShape> {
        vec![&SECRET_NOT_AFTER]
    }

    fn collect(&self) -> Vec<Sample> {
        self.sweep().samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExporterError, SkipReason};
    use crate::kube::{DynamicObject, GroupVersionResource, ListParams, ObjectMeta, Secret};
    use crate::metrics::{LABEL_CERTIFICATE_NAME, LABEL_NAMESPACE, LABEL_SECRET_KEY};
    use crate::source::CERTIFICATE_NAME_ANNOTATION;
    use crate::testutil::{certificate_pem, rsa_private_key_pem};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::collections::BTreeMap;

    struct FakeKube {
        by_namespace: BTreeMap<String, Vec<Secret>>,
    }

    impl KubeApi for FakeKube {
        fn list_secrets(
            &self,
            namespace: Option<&str>,
            _field_selector: &str,
        ) -> Result<Vec<Secret>, ExporterError> {
            match namespace {
                Some(ns) => self.by_namespace.get(ns).cloned().ok_or_else(|| {
                    ExporterError::RemoteCall {
                        endpoint: format!("/api/v1/namespaces/{}/secrets", ns),
                        details: "403 Forbidden".to_string(),
                    }
                }),
                None => Ok(self.by_namespace.values().flatten().cloned().collect()),
            }
        }

        fn list_custom_resources(
            &self,
            _gvr: &GroupVersionResource,
            _namespace: Option<&str>,
            _params: &ListParams,
        ) -> Result<Vec<DynamicObject>, ExporterError> {
            Ok(Vec::new())
        }
    }

    fn tls_secret(namespace: &str, name: &str, data: &[(&str, String)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..ObjectMeta::default()
            },
            secret_type: "kubernetes.io/tls".to_string(),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), STANDARD.encode(v)))
                .collect(),
        }
    }

    fn collector(by_namespace: BTreeMap<String, Vec<Secret>>, namespaces: &[&str]) -> SecretCollector {
        SecretCollector::new(
            Arc::new(FakeKube { by_namespace }),
            &SecretCollectorConfig {
                namespaces: namespaces.iter().map(|ns| ns.to_string()).collect(),
            },
        )
    }

    #[test]
    fn test_secret_collector_both_keys() {
        let mut secret = tls_secret(
            "default",
            "web-tls",
            &[
                ("ca.crt", certificate_pem("ca", 2_000_000_000)),
                ("tls.crt", certificate_pem("web", 1_735_689_600)),
                ("tls.key", rsa_private_key_pem()),
            ],
        );
        secret
            .metadata
            .annotations
            .insert(CERTIFICATE_NAME_ANNOTATION.to_string(), "web".to_string());

        let mut secrets = BTreeMap::new();
        secrets.insert("default".to_string(), vec![secret]);
        let samples = collector(secrets, &[]).collect();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label(LABEL_SECRET_KEY), Some("ca.crt"));
        assert_eq!(samples[0].value, 2_000_000_000.0);
        assert_eq!(
            samples[1].label_values,
            vec!["web-tls", "default", "tls.crt", "web"]
        );
        assert_eq!(samples[1].value, 1_735_689_600.0);
    }

    #[test]
    fn test_secret_collector_failing_namespace() {
        let mut secrets = BTreeMap::new();
        for ns in ["a", "b"] {
            secrets.insert(
                ns.to_string(),
                vec![tls_secret(
                    ns,
                    "tls",
                    &[("tls.crt", certificate_pem(ns, 1_800_000_000))],
                )],
            );
        }

        let report = collector(secrets, &["a", "broken", "b"]).sweep();
        let namespaces: Vec<Option<&str>> = report
            .samples
            .iter()
            .map(|s| s.label(LABEL_NAMESPACE))
            .collect();
        assert_eq!(namespaces, vec![Some("a"), Some("b")]);
        assert_eq!(report.failed_roots, vec!["namespace broken".to_string()]);
        // ca.crt is absent from both secrets
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::PathMissing));
    }

    #[test]
    fn test_secret_collector_missing_annotation() {
        let mut secrets = BTreeMap::new();
        secrets.insert(
            "default".to_string(),
            vec![tls_secret(
                "default",
                "plain",
                &[("tls.crt", certificate_pem("plain", 1_800_000_000))],
            )],
        );
        let samples = collector(secrets, &["default"]).collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].label(LABEL_CERTIFICATE_NAME), Some(""));
    }
}
