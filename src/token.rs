//! Vault token inspection.
//!
//! A token file holds either a bare token or `VAULT_TOKEN=<token>` on its first
//! line. The token is checked against the configured [`TokenFormat`], then
//! Vault is asked about it through a [`TokenIntrospector`].

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::{Client, Request};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use url::Url;

use crate::error::{ExporterError, SkipReason};
use crate::kube::base_url;
use crate::kube::object::{nested, Field};

/// Literal prefix stripped from the first line of a token file.
pub const TOKEN_PREFIX: &str = "VAULT_TOKEN=";

const EXPIRE_TIME_KEY: &str = "expire_time";
const EXPIRE_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";
const TOKEN_HEADER: &str = "X-Vault-Token";

lazy_static! {
    static ref UUID_TOKEN: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    )
    .unwrap();
    static ref VERSIONED_TOKEN: Regex = Regex::new(r"^[a-z]{1,3}\.[A-Za-z0-9_-]{24,}$").unwrap();
}

/// Accepted token shapes.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TokenFormat {
    /// Hyphenated UUID, as issued by older Vault releases
    Uuid,
    /// `<type prefix>.<24 or more characters>`, e.g. `s.…` or `hvs.…`
    #[default]
    Versioned,
    /// Any non-empty token
    Any,
}

impl TokenFormat {
    pub fn matches(&self, token: &str) -> bool {
        match self {
            TokenFormat::Uuid => UUID_TOKEN.is_match(token),
            TokenFormat::Versioned => VERSIONED_TOKEN.is_match(token),
            TokenFormat::Any => !token.is_empty(),
        }
    }
}

/// Remote service that can vouch for a token.
pub trait TokenIntrospector: Send + Sync {
    /// Succeeds when the service is able to answer lookups.
    fn health(&self) -> Result<(), ExporterError>;

    /// The `data` object of a self-lookup performed with `token`.
    fn lookup_self(&self, token: &str) -> Result<Value, ExporterError>;
}

impl<T: TokenIntrospector + ?Sized> TokenIntrospector for Arc<T> {
    fn health(&self) -> Result<(), ExporterError> {
        (**self).health()
    }

    fn lookup_self(&self, token: &str) -> Result<Value, ExporterError> {
        (**self).lookup_self(token)
    }
}

/// Outcome of a successful inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenExpiry {
    /// Expires at this Unix timestamp
    At(i64),
    /// The lookup itself failed; reported as the epoch so it stands out
    Unreachable(String),
}

impl TokenExpiry {
    pub fn sample_value(&self) -> f64 {
        match self {
            TokenExpiry::At(timestamp) => *timestamp as f64,
            TokenExpiry::Unreachable(_) => 0.0,
        }
    }
}

pub struct TokenInspector<I> {
    introspector: I,
    format: TokenFormat,
}

impl<I: TokenIntrospector> TokenInspector<I> {
    pub fn new(introspector: I, format: TokenFormat) -> Self {
        TokenInspector {
            introspector,
            format,
        }
    }

    /// Inspects the first line of a token file.
    pub fn inspect(&self, first_line: &str) -> Result<TokenExpiry, SkipReason> {
        let line = first_line.trim();
        let token = line.strip_prefix(TOKEN_PREFIX).unwrap_or(line).trim();

        if !self.format.matches(token) {
            return Err(SkipReason::DecodeError(format!(
                "token does not match the {} format",
                self.format
            )));
        }

        self.introspector
            .health()
            .map_err(|e| SkipReason::ServiceUnhealthy(e.to_string()))?;

        let data = match self.introspector.lookup_self(token) {
            Ok(data) => data,
            Err(e) => return Ok(TokenExpiry::Unreachable(e.to_string())),
        };
        parse_expire_time(&data).map(TokenExpiry::At)
    }
}

/// Extracts `expire_time` from self-lookup data.
pub fn parse_expire_time(data: &Value) -> Result<i64, SkipReason> {
    match nested(data, &[EXPIRE_TIME_KEY]) {
        Field::Present(Value::Null) => Err(SkipReason::NoExpiration),
        Field::Present(Value::String(raw)) => parse_timestamp(raw),
        Field::Present(other) => Err(SkipReason::DecodeError(format!(
            "{} must be a string, got {}",
            EXPIRE_TIME_KEY, other
        ))),
        Field::Absent => Err(SkipReason::DecodeError(format!(
            "missing {}",
            EXPIRE_TIME_KEY
        ))),
        Field::WrongType { .. } => Err(SkipReason::DecodeError(
            "lookup data is not an object".to_string(),
        )),
    }
}

/// Parses `<YYYY-MM-DDTHH:MM:SS>.<suffix>` as UTC, ignoring the suffix.
fn parse_timestamp(raw: &str) -> Result<i64, SkipReason> {
    let head = raw.split('.').next().unwrap_or(raw).trim_end_matches('Z');
    NaiveDateTime::parse_from_str(head, EXPIRE_TIME_LAYOUT)
        .map(|t| t.and_utc().timestamp())
        .map_err(|e| SkipReason::DecodeError(format!("{} {:?}: {}", EXPIRE_TIME_KEY, raw, e)))
}

/// Vault HTTP API client.
pub struct VaultClient {
    client: Client,
    base_url: Url,
}

impl VaultClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, ExporterError> {
        let base_url = base_url(address, "Vault")?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(VaultClient { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExporterError> {
        self.base_url
            .join(path)
            .map_err(|e| ExporterError::Configuration {
                reason: format!("invalid Vault path {}: {}", path, e),
            })
    }

    fn health_request(&self) -> Result<Request, ExporterError> {
        let url = self.endpoint("v1/sys/health")?;
        let request = self
            .client
            .get(url)
            .query(&[("standbyok", "true"), ("perfstandbyok", "true")])
            .build()?;
        Ok(request)
    }

    fn lookup_request(&self, token: &str) -> Result<Request, ExporterError> {
        let url = self.endpoint("v1/auth/token/lookup-self")?;
        Ok(self.client.get(url).header(TOKEN_HEADER, token).build()?)
    }
}

/// Maps a health check status onto a result.
fn health_status(url: &Url, status: StatusCode) -> Result<(), ExporterError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ExporterError::RemoteCall {
            endpoint: url.to_string(),
            details: format!("vault reported status {}", status),
        })
    }
}

/// Extracts the `data` object of a lookup response.
fn lookup_data(url: &Url, status: StatusCode, body: &[u8]) -> Result<Value, ExporterError> {
    if !status.is_success() {
        return Err(ExporterError::RemoteCall {
            endpoint: url.to_string(),
            details: format!("unexpected status {}", status),
        });
    }
    let body: Value = serde_json::from_slice(body).map_err(|e| ExporterError::RemoteCall {
        endpoint: url.to_string(),
        details: format!("malformed lookup response: {}", e),
    })?;
    match body.get("data") {
        Some(data @ Value::Object(_)) => Ok(data.clone()),
        _ => Err(ExporterError::RemoteCall {
            endpoint: url.to_string(),
            details: "response carries no data object".to_string(),
        }),
    }
}

impl TokenIntrospector for VaultClient {
    fn health(&self) -> Result<(), ExporterError> {
        let request = self.health_request()?;
        let url = request.url().clone();
        let response = self.client.execute(request)?;
        health_status(&url, response.status())
    }

    fn lookup_self(&self, token: &str) -> Result<Value, ExporterError> {
        let request = self.lookup_request(token)?;
        let url = request.url().clone();
        let response = self.client.execute(request)?;
        let status = response.status();
        let body = response.bytes()?;
        lookup_data(&url, status, &body)
    }
}
