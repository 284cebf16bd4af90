use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collector::{certificate_samples, sweep, Collector, SweepReport};
use crate::config::FileCollectorConfig;
use crate::decoder::CertificateDecoder;
use crate::fs::Filesystem;
use crate::metrics::{MetricShape, Sample, LABEL_PATH, NOT_AFTER};
use crate::source::FileSource;

/// Certificates found by walking the configured directories.
pub struct FileCollector {
    source: FileSource,
    decoder: CertificateDecoder,
}

impl FileCollector {
    pub fn new(fs: Arc<dyn Filesystem>, config: &FileCollectorConfig) -> Self {
        let decoder = if config.decode_bundles {
            CertificateDecoder::with_bundles()
        } else {
            CertificateDecoder::new()
        };
        FileCollector {
            source: FileSource::new(fs, config.paths.clone()),
            decoder,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        sweep(self.name(), &self.source, |raw| {
            let mut labels = BTreeMap::new();
            labels.insert(LABEL_PATH.to_string(), raw.reference.path_label());
            certificate_samples(self.name(), &self.decoder, &NOT_AFTER, raw, &labels)
        })
    }
}

impl Collector for FileCollector {
    fn name(&self) -> &'static str {
        "file"
    }

    fn describe(&self) -> Vec<&'static MetricShape> {
        vec![&NOT_AFTER]
    }

    fn collect(&self) -> Vec<Sample> {
        self.sweep().samples
    }
}
