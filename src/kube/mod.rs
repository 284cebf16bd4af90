//! Kubernetes API access.
//!
//! Collectors only see the [`KubeApi`] trait. [`HttpKubeClient`] implements it
//! with plain list calls against the API server, authenticating with the pod's
//! service-account token.

pub mod object;

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::{Client, Request};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ExporterError;
pub use object::{DynamicObject, Field, ObjectList, ObjectMeta, Secret};

/// Field selector restricting secret lists to TLS secrets.
pub const TLS_SECRET_FIELD_SELECTOR: &str = "type=kubernetes.io/tls";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Identifies a custom resource collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVersionResource {
    pub group: &'static str,
    pub version: &'static str,
    pub resource: &'static str,
}

impl GroupVersionResource {
    /// API path of the collection relative to the server URL, unscoped when
    /// `namespace` is `None`.
    pub fn path(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!(
                "apis/{}/{}/namespaces/{}/{}",
                self.group, self.version, ns, self.resource
            ),
            None => format!("apis/{}/{}/{}", self.group, self.version, self.resource),
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.resource)
    }
}

pub const CERTIFICATES: GroupVersionResource = GroupVersionResource {
    group: "cert-manager.io",
    version: "v1",
    resource: "certificates",
};

pub const ISSUERS: GroupVersionResource = GroupVersionResource {
    group: "cert-manager.io",
    version: "v1",
    resource: "issuers",
};

pub const CLUSTER_ISSUERS: GroupVersionResource = GroupVersionResource {
    group: "cert-manager.io",
    version: "v1",
    resource: "clusterissuers",
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListParams {
    pub fn labels(selector: &str) -> Self {
        ListParams {
            label_selector: Some(selector.to_string()),
            field_selector: None,
        }
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = Vec::new();
        if let Some(selector) = &self.label_selector {
            query.push(("labelSelector", selector.as_str()));
        }
        if let Some(selector) = &self.field_selector {
            query.push(("fieldSelector", selector.as_str()));
        }
        query
    }
}

/// List operations the collectors need from the API server.
///
/// `namespace: None` issues the unscoped list call (all namespaces, or the
/// cluster scope for cluster-scoped resources).
pub trait KubeApi: Send + Sync {
    fn list_secrets(
        &self,
        namespace: Option<&str>,
        field_selector: &str,
    ) -> Result<Vec<Secret>, ExporterError>;

    fn list_custom_resources(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>, ExporterError>;
}

/// Connection settings for [`HttpKubeClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct KubeClientConfig {
    /// API server URL; derived from `KUBERNETES_SERVICE_HOST`/`PORT` when unset
    pub api_url: Option<String>,
    pub token_path: PathBuf,
    pub ca_path: PathBuf,
    pub timeout: Duration,
}

impl Default for KubeClientConfig {
    fn default() -> Self {
        KubeClientConfig {
            api_url: None,
            token_path: PathBuf::from(SERVICE_ACCOUNT_DIR).join("token"),
            ca_path: PathBuf::from(SERVICE_ACCOUNT_DIR).join("ca.crt"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Blocking REST client for the Kubernetes API server.
pub struct HttpKubeClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpKubeClient {
    pub fn new(config: &KubeClientConfig) -> Result<Self, ExporterError> {
        let base = match &config.api_url {
            Some(url) => url.clone(),
            None => in_cluster_url()?,
        };
        let base_url = base_url(&base, "Kubernetes API")?;

        let mut builder = Client::builder().timeout(config.timeout);
        if config.ca_path.exists() {
            let pem = fs::read(&config.ca_path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        let token = match fs::read_to_string(&config.token_path) {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        tracing::info!(api = %base_url, authenticated = token.is_some(), "created Kubernetes client");
        Ok(HttpKubeClient {
            client: builder.build()?,
            base_url,
            token,
        })
    }

    fn list_request(&self, path: &str, query: &[(&str, &str)]) -> Result<Request, ExporterError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ExporterError::Configuration {
                reason: format!("invalid API path {}: {}", path, e),
            })?;

        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.build()?)
    }

    fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ExporterError> {
        let request = self.list_request(path, query)?;
        let url = request.url().clone();
        let response = self.client.execute(request)?;
        let status = response.status();
        let body = response.bytes()?;
        list_items(&url, status, &body)
    }
}

/// Parses `raw` as the base URL of an HTTP API.
///
/// The path always ends in `/` so that relative joins keep any prefix, such as
/// the one a proxy adds.
pub(crate) fn base_url(raw: &str, service: &str) -> Result<Url, ExporterError> {
    let mut url = Url::parse(raw).map_err(|e| ExporterError::Configuration {
        reason: format!("invalid {} URL {}: {}", service, raw, e),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Maps a list response onto its items.
fn list_items<T: DeserializeOwned>(
    url: &Url,
    status: StatusCode,
    body: &[u8],
) -> Result<Vec<T>, ExporterError> {
    if !status.is_success() {
        return Err(ExporterError::RemoteCall {
            endpoint: url.to_string(),
            details: format!("unexpected status {}", status),
        });
    }
    let list: ObjectList<T> =
        serde_json::from_slice(body).map_err(|e| ExporterError::RemoteCall {
            endpoint: url.to_string(),
            details: format!("malformed list response: {}", e),
        })?;
    Ok(list.items)
}

fn in_cluster_url() -> Result<String, ExporterError> {
    let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| ExporterError::Configuration {
        reason: "KUBERNETES_SERVICE_HOST is not set and no Kubernetes API URL is configured"
            .to_string(),
    })?;
    let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Ok(format!("https://[{}]:{}", host, port))
    } else {
        Ok(format!("https://{}:{}", host, port))
    }
}

impl KubeApi for HttpKubeClient {
    fn list_secrets(
        &self,
        namespace: Option<&str>,
        field_selector: &str,
    ) -> Result<Vec<Secret>, ExporterError> {
        let path = match namespace {
            Some(ns) => format!("api/v1/namespaces/{}/secrets", ns),
            None => "api/v1/secrets".to_string(),
        };
        self.list(&path, &[("fieldSelector", field_selector)])
    }

    fn list_custom_resources(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>, ExporterError> {
        self.list(&gvr.path(namespace), &params.query())
    }
}
