use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::DateTime;

use crate::collector::{sweep, Collector, SweepReport};
use crate::config::CertificateCollectorConfig;
use crate::error::{ExporterError, Skipped};
use crate::kube::{DynamicObject, KubeApi, ListParams, CLUSTER_ISSUERS, ISSUERS};
use crate::metrics::{
    MetricShape, Sample, CERTIFICATE_CR_NOT_AFTER, LABEL_ISSUER_REF, LABEL_MANAGED_ISSUER,
    LABEL_NAME, LABEL_NAMESPACE,
};
use crate::model::ArtifactRef;
use crate::source::CertificateSource;

pub const MANAGED_TRUE: &str = "true";
pub const MANAGED_FALSE: &str = "false";
pub const MANAGED_UNKNOWN: &str = "unknown";

/// Where an issuer reference points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IssuerScope {
    Namespaced(String),
    Cluster,
}

/// Names of managed issuers, looked up at most once per scope and sweep.
struct IssuerIndex<'a> {
    api: &'a dyn KubeApi,
    selector: &'a str,
    known: HashMap<IssuerScope, Option<BTreeSet<String>>>,
}

impl<'a> IssuerIndex<'a> {
    fn new(api: &'a dyn KubeApi, selector: &'a str) -> Self {
        IssuerIndex {
            api,
            selector,
            known: HashMap::new(),
        }
    }

    fn managed_names(&mut self, scope: IssuerScope) -> Option<&BTreeSet<String>> {
        let api = self.api;
        let selector = self.selector;
        self.known
            .entry(scope)
            .or_insert_with_key(|scope| {
                let listed = match scope {
                    IssuerScope::Namespaced(ns) => api.list_custom_resources(
                        &ISSUERS,
                        Some(ns.as_str()),
                        &ListParams::labels(selector),
                    ),
                    IssuerScope::Cluster => api.list_custom_resources(
                        &CLUSTER_ISSUERS,
                        None,
                        &ListParams::labels(selector),
                    ),
                };
                match listed {
                    Ok(issuers) => Some(issuers.iter().map(|i| i.name().to_string()).collect()),
                    Err(e) => {
                        tracing::warn!(scope = ?scope, error = %e, "could not look up managed issuers");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// `managed_issuer` label value for one issuer reference.
    fn label(&mut self, namespace: &str, issuer: &str, kind: Option<&str>) -> &'static str {
        if issuer.is_empty() {
            return MANAGED_UNKNOWN;
        }
        let scope = match kind {
            None | Some("Issuer") => IssuerScope::Namespaced(namespace.to_string()),
            Some("ClusterIssuer") => IssuerScope::Cluster,
            Some(_) => return MANAGED_UNKNOWN,
        };
        match self.managed_names(scope) {
            Some(names) if names.contains(issuer) => MANAGED_TRUE,
            Some(_) => MANAGED_FALSE,
            None => MANAGED_UNKNOWN,
        }
    }
}

/// Parses `status.notAfter` (RFC 3339) into Unix seconds.
pub fn parse_not_after(value: &str) -> Result<i64, ExporterError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.timestamp())
        .map_err(|e| ExporterError::Decode {
            reason: format!("status.notAfter {:?} is not RFC 3339: {}", value, e),
        })
}

/// cert-manager Certificate resources.
pub struct CertificateCollector {
    api: Arc<dyn KubeApi>,
    source: CertificateSource,
    managed_issuer_selector: Option<String>,
}

impl CertificateCollector {
    pub fn new(api: Arc<dyn KubeApi>, config: &CertificateCollectorConfig) -> Self {
        CertificateCollector {
            source: CertificateSource::new(Arc::clone(&api), config.namespaces.clone()),
            api,
            managed_issuer_selector: config.managed_issuer_selector.clone(),
        }
    }

    pub fn sweep(&self) -> SweepReport {
        let mut issuers = self
            .managed_issuer_selector
            .as_deref()
            .map(|selector| IssuerIndex::new(self.api.as_ref(), selector));

        sweep(self.name(), &self.source, |object| {
            self.certificate_sample(&object, issuers.as_mut())
        })
    }

    fn certificate_sample(
        &self,
        object: &DynamicObject,
        issuers: Option<&mut IssuerIndex<'_>>,
    ) -> Result<Vec<Sample>, Skipped> {
        let reference = ArtifactRef::CustomResource {
            namespace: object.namespace().to_string(),
            name: object.name().to_string(),
        };
        let not_after = object
            .field_str(&["status", "notAfter"])
            .require("status.notAfter")
            .and_then(parse_not_after)
            .map_err(|e| Skipped::new(reference.clone(), e.into()))?;

        let issuer_ref = object
            .field_str(&["spec", "issuerRef", "name"])
            .present()
            .unwrap_or_default();
        let managed = match issuers {
            Some(index) => index.label(
                object.namespace(),
                issuer_ref,
                object.field_str(&["spec", "issuerRef", "kind"]).present(),
            ),
            None => "",
        };

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_NAME.to_string(), object.name().to_string());
        labels.insert(LABEL_NAMESPACE.to_string(), object.namespace().to_string());
        labels.insert(LABEL_ISSUER_REF.to_string(), issuer_ref.to_string());
        labels.insert(LABEL_MANAGED_ISSUER.to_string(), managed.to_string());

        tracing::debug!(
            collector = self.name(),
            artifact = %reference,
            not_after,
            "adding to the metrics"
        );
        Ok(vec![CERTIFICATE_CR_NOT_AFTER.sample(not_after as f64, &labels)])
    }
}

impl Collector for CertificateCollector {
    fn name(&self) -> &'static str {
        "certificate"
    }

    fn describe(&self) -> Vec<&'static MetricShape> {
        vec![&CERTIFICATE_CR_NOT_AFTER]
    }

    fn collect(&self) -> Vec<Sample> {
        self.sweep().samples
    }
}
