//! Metric shapes and samples.
//!
//! Every exported metric is a gauge holding a Unix timestamp. The label order
//! declared here is what consumers see, and every [`Sample`] is built from a
//! shape so its values always line up with the declared names.
//!
//! # Submodules
//!
//! - `prom` - conversion to Prometheus metric families and the text format

pub mod prom;

use std::collections::BTreeMap;

pub const LABEL_PATH: &str = "path";
pub const LABEL_NAME: &str = "name";
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_SECRET_KEY: &str = "secretkey";
pub const LABEL_CERTIFICATE_NAME: &str = "certificatename";
pub const LABEL_ISSUER_REF: &str = "issuer_ref";
pub const LABEL_MANAGED_ISSUER: &str = "managed_issuer";

/// Name, help text and ordered label names of one metric.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricShape {
    pub name: &'static str,
    pub help: &'static str,
    pub label_names: &'static [&'static str],
}

pub static NOT_AFTER: MetricShape = MetricShape {
    name: "cert_exporter_not_after",
    help: "Timestamp after which the cert is invalid.",
    label_names: &[LABEL_PATH],
};

pub static SECRET_NOT_AFTER: MetricShape = MetricShape {
    name: "cert_exporter_secret_not_after",
    help: "Timestamp after which the cert is invalid.",
    label_names: &[
        LABEL_NAME,
        LABEL_NAMESPACE,
        LABEL_SECRET_KEY,
        LABEL_CERTIFICATE_NAME,
    ],
};

pub static CERTIFICATE_CR_NOT_AFTER: MetricShape = MetricShape {
    name: "cert_exporter_certificate_cr_not_after",
    help: "Timestamp after which the cert is invalid.",
    label_names: &[
        LABEL_NAME,
        LABEL_NAMESPACE,
        LABEL_ISSUER_REF,
        LABEL_MANAGED_ISSUER,
    ],
};

pub static TOKEN_NOT_AFTER: MetricShape = MetricShape {
    name: "cert_exporter_token_not_after",
    help: "Timestamp after which the Vault token is expired.",
    label_names: &[LABEL_PATH],
};

impl MetricShape {
    /// Builds a sample, taking label values from `labels` in declared order.
    ///
    /// Labels missing from the map get the empty string; labels not declared
    /// by the shape are ignored.
    pub fn sample(&'static self, value: f64, labels: &BTreeMap<String, String>) -> Sample {
        Sample {
            metric_name: self.name,
            label_names: self.label_names,
            label_values: self
                .label_names
                .iter()
                .map(|name| labels.get(*name).cloned().unwrap_or_default())
                .collect(),
            value,
        }
    }
}

/// One exported value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric_name: &'static str,
    pub label_names: &'static [&'static str],
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.label_names
            .iter()
            .position(|n| *n == name)
            .map(|i| self.label_values[i].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_follows_declared_order() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_SECRET_KEY.to_string(), "tls.crt".to_string());
        labels.insert(LABEL_NAMESPACE.to_string(), "default".to_string());
        labels.insert(LABEL_NAME.to_string(), "web-tls".to_string());
        labels.insert("common_name".to_string(), "ignored".to_string());

        let sample = SECRET_NOT_AFTER.sample(1.0, &labels);
        assert_eq!(sample.metric_name, "cert_exporter_secret_not_after");
        assert_eq!(sample.label_values, vec!["web-tls", "default", "tls.crt", ""]);
        assert_eq!(sample.label(LABEL_CERTIFICATE_NAME), Some(""));
        assert_eq!(sample.label("issuer"), None);
    }
}
