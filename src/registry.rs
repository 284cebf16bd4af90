//! The set of active collectors.
//!
//! Collectors are registered once at startup and never removed. Every scrape
//! runs each collector in turn; a collector that panics is logged and
//! contributes nothing to that scrape. The registry plugs into an explicitly
//! constructed `prometheus::Registry` so nothing is registered globally.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto::MetricFamily;

use crate::collector::{
    CertificateCollector, Collector, FileCollector, SecretCollector, TokenCollector,
};
use crate::config::Settings;
use crate::error::ExporterError;
use crate::fs::{Filesystem, OsFilesystem};
use crate::kube::{HttpKubeClient, KubeApi};
use crate::metrics::{prom, MetricShape, Sample};
use crate::token::VaultClient;

#[derive(Default)]
pub struct Registry {
    collectors: Vec<Box<dyn Collector>>,
    descs: Vec<Desc>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Builds every collector enabled in `settings` against the real
    /// filesystem, Kubernetes API and Vault.
    pub fn from_settings(settings: &Settings) -> Result<Self, ExporterError> {
        let fs: Arc<dyn Filesystem> = Arc::new(OsFilesystem);
        let mut registry = Registry::new();

        if let Some(config) = &settings.files {
            registry.register(Box::new(FileCollector::new(Arc::clone(&fs), config)))?;
        }

        let kube: Option<Arc<dyn KubeApi>> =
            if settings.secrets.is_some() || settings.certificates.is_some() {
                Some(Arc::new(HttpKubeClient::new(&settings.kubernetes)?))
            } else {
                None
            };
        if let (Some(config), Some(api)) = (&settings.secrets, &kube) {
            registry.register(Box::new(SecretCollector::new(Arc::clone(api), config)))?;
        }
        if let (Some(config), Some(api)) = (&settings.certificates, &kube) {
            registry.register(Box::new(CertificateCollector::new(Arc::clone(api), config)))?;
        }

        if let Some(config) = &settings.tokens {
            let vault = VaultClient::new(&config.vault_url, settings.request_timeout)?;
            registry.register(Box::new(TokenCollector::new(
                Arc::clone(&fs),
                Arc::new(vault),
                config,
            )))?;
        }

        Ok(registry)
    }

    /// Adds a collector. Fails if it declares a metric another collector
    /// already declared.
    pub fn register(&mut self, collector: Box<dyn Collector>) -> Result<(), ExporterError> {
        let declared = self.describe_all();
        let mut descs = Vec::new();
        for shape in collector.describe() {
            if declared.iter().any(|known| known.name == shape.name) {
                return Err(ExporterError::Configuration {
                    reason: format!(
                        "metric {} is already declared by another collector",
                        shape.name
                    ),
                });
            }
            descs.push(prom::descriptor(shape)?);
        }

        tracing::info!(collector = collector.name(), "registered collector");
        self.descs.extend(descs);
        self.collectors.push(collector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    pub fn describe_all(&self) -> Vec<&'static MetricShape> {
        self.collectors
            .iter()
            .flat_map(|collector| collector.describe())
            .collect()
    }

    /// Runs every collector once and concatenates their samples.
    pub fn collect_all(&self) -> Vec<Sample> {
        let mut samples = Vec::new();
        for collector in &self.collectors {
            match panic::catch_unwind(AssertUnwindSafe(|| collector.collect())) {
                Ok(collected) => samples.extend(collected),
                Err(_) => {
                    tracing::error!(
                        collector = collector.name(),
                        "collector panicked, its metrics are missing from this scrape"
                    );
                }
            }
        }
        samples
    }

    /// Wraps the registry, plus process metrics on Linux, in a
    /// `prometheus::Registry`.
    pub fn into_prometheus(self) -> Result<prometheus::Registry, ExporterError> {
        let registry = prometheus::Registry::new();
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;
        registry.register(Box::new(self))?;
        Ok(registry)
    }
}

impl PromCollector for Registry {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        prom::gauge_families(&self.describe_all(), &self.collect_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{LABEL_PATH, NOT_AFTER, TOKEN_NOT_AFTER};
    use std::collections::BTreeMap;

    struct Fixed {
        name: &'static str,
        shape: &'static MetricShape,
        value: f64,
    }

    impl Collector for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn describe(&self) -> Vec<&'static MetricShape> {
            vec![self.shape]
        }

        fn collect(&self) -> Vec<Sample> {
            let mut labels = BTreeMap::new();
            labels.insert(LABEL_PATH.to_string(), format!("/{}", self.name));
            vec![self.shape.sample(self.value, &labels)]
        }
    }

    struct Panicking;

    impl Collector for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn describe(&self) -> Vec<&'static MetricShape> {
            Vec::new()
        }

        fn collect(&self) -> Vec<Sample> {
            panic!("boom")
        }
    }

    fn fixed(name: &'static str, shape: &'static MetricShape, value: f64) -> Box<dyn Collector> {
        Box::new(Fixed { name, shape, value })
    }

    #[test]
    fn test_register_rejects_duplicate_metric() {
        let mut registry = Registry::new();
        registry.register(fixed("a", &NOT_AFTER, 1.0)).unwrap();
        let err = registry.register(fixed("b", &NOT_AFTER, 2.0)).unwrap_err();
        assert!(matches!(err, ExporterError::Configuration { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_collect_all_survives_panics() {
        let mut registry = Registry::new();
        registry.register(fixed("file", &NOT_AFTER, 1.0)).unwrap();
        registry.register(Box::new(Panicking)).unwrap();
        registry.register(fixed("token", &TOKEN_NOT_AFTER, 2.0)).unwrap();

        let values: Vec<f64> = registry.collect_all().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
        assert_eq!(
            registry.describe_all(),
            vec![&NOT_AFTER, &TOKEN_NOT_AFTER]
        );
    }

    #[test]
    fn test_into_prometheus_exposes_samples() {
        let mut registry = Registry::new();
        registry.register(fixed("token", &TOKEN_NOT_AFTER, 0.0)).unwrap();
        let prometheus = registry.into_prometheus().unwrap();

        let text = prom::encode_text(&prometheus).unwrap();
        assert!(text.contains("# HELP cert_exporter_token_not_after"));
        assert!(text.contains("cert_exporter_token_not_after{path=\"/token\"} 0"));
    }
}
