//! Configuration file management for cert-exporter.
//!
//! This module handles loading, parsing, and merging configuration from TOML files
//! and command-line arguments, then validating the result into immutable
//! per-collector [`Settings`].
//!
//! # Configuration Precedence
//!
//! 1. Default values (lowest priority)
//! 2. Configuration file (specified with --config)
//! 3. Command-line arguments and their environment variables (highest priority)
//!
//! # Example Configuration File
//!
//! ```toml
//! listen_address = "0.0.0.0:9005"
//!
//! [files]
//! enabled = true
//! paths = ["/etc/kubernetes/ssl"]
//!
//! [secrets]
//! enabled = true
//! namespaces = ["default", "kube-system"]
//!
//! [tokens]
//! enabled = true
//! path = "/etc/tokens"
//! vault_url = "https://vault.example.com:8200"
//! token_format = "versioned"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::kube::KubeClientConfig;
use crate::token::TokenFormat;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9005";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main configuration structure for cert-exporter.
///
/// All fields are optional to support partial configuration and merging.
/// Missing values will be filled in by defaults or overridden by CLI arguments.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Address the metrics endpoint binds to
    pub listen_address: Option<String>,
    /// Log filter used when RUST_LOG is not set
    pub log_level: Option<String>,
    /// Timeout for each Kubernetes or Vault request
    pub request_timeout_secs: Option<u64>,
    pub files: Option<FilesConfig>,
    pub secrets: Option<SecretsConfig>,
    pub certificates: Option<CertificatesConfig>,
    pub tokens: Option<TokensConfig>,
    pub kubernetes: Option<KubernetesConfig>,
}

/// Certificate files on disk.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct FilesConfig {
    pub enabled: Option<bool>,
    /// Directories walked recursively
    pub paths: Option<Vec<String>>,
    /// Decode every PEM block of a file instead of only the first
    pub decode_bundles: Option<bool>,
}

/// Kubernetes TLS secrets.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct SecretsConfig {
    pub enabled: Option<bool>,
    /// Namespaces to list; all namespaces when empty
    pub namespaces: Option<Vec<String>>,
}

/// cert-manager Certificate resources.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CertificatesConfig {
    pub enabled: Option<bool>,
    pub namespaces: Option<Vec<String>>,
    /// Label selector identifying managed Issuers and ClusterIssuers
    pub managed_issuer_selector: Option<String>,
}

/// Vault token files.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct TokensConfig {
    pub enabled: Option<bool>,
    /// Directory holding one token per file
    pub path: Option<String>,
    pub vault_url: Option<String>,
    pub token_format: Option<TokenFormat>,
}

/// Kubernetes API connection overrides.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct KubernetesConfig {
    pub api_url: Option<String>,
    pub token_path: Option<String>,
    pub ca_path: Option<String>,
}

/// Field-by-field merge where `other` wins whenever it has a value.
pub trait Merge {
    fn merge_with(self, other: Self) -> Self;
}

fn pick<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    other.or(base)
}

fn merge_section<T: Merge>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (Some(base), Some(other)) => Some(base.merge_with(other)),
        (base, None) => base,
        (None, other) => other,
    }
}

impl Merge for FilesConfig {
    fn merge_with(self, other: Self) -> Self {
        FilesConfig {
            enabled: pick(self.enabled, other.enabled),
            paths: pick(self.paths, other.paths),
            decode_bundles: pick(self.decode_bundles, other.decode_bundles),
        }
    }
}

impl Merge for SecretsConfig {
    fn merge_with(self, other: Self) -> Self {
        SecretsConfig {
            enabled: pick(self.enabled, other.enabled),
            namespaces: pick(self.namespaces, other.namespaces),
        }
    }
}

impl Merge for CertificatesConfig {
    fn merge_with(self, other: Self) -> Self {
        CertificatesConfig {
            enabled: pick(self.enabled, other.enabled),
            namespaces: pick(self.namespaces, other.namespaces),
            managed_issuer_selector: pick(
                self.managed_issuer_selector,
                other.managed_issuer_selector,
            ),
        }
    }
}

impl Merge for TokensConfig {
    fn merge_with(self, other: Self) -> Self {
        TokensConfig {
            enabled: pick(self.enabled, other.enabled),
            path: pick(self.path, other.path),
            vault_url: pick(self.vault_url, other.vault_url),
            token_format: pick(self.token_format, other.token_format),
        }
    }
}

impl Merge for KubernetesConfig {
    fn merge_with(self, other: Self) -> Self {
        KubernetesConfig {
            api_url: pick(self.api_url, other.api_url),
            token_path: pick(self.token_path, other.token_path),
            ca_path: pick(self.ca_path, other.ca_path),
        }
    }
}

impl Merge for Config {
    /// Merges this configuration with another, prioritizing the other's values.
    ///
    /// For each field, if the `other` config has a value (Some), it overrides
    /// this config's value. Sections merge field by field.
    fn merge_with(self, other: Config) -> Self {
        Config {
            listen_address: pick(self.listen_address, other.listen_address),
            log_level: pick(self.log_level, other.log_level),
            request_timeout_secs: pick(self.request_timeout_secs, other.request_timeout_secs),
            files: merge_section(self.files, other.files),
            secrets: merge_section(self.secrets, other.secrets),
            certificates: merge_section(self.certificates, other.certificates),
            tokens: merge_section(self.tokens, other.tokens),
            kubernetes: merge_section(self.kubernetes, other.kubernetes),
        }
    }
}

impl Default for Config {
    /// Creates a configuration with sensible defaults.
    ///
    /// The file collector is enabled and still needs paths; every other
    /// collector is disabled.
    fn default() -> Self {
        Config {
            listen_address: Some(DEFAULT_LISTEN_ADDRESS.to_string()),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
            files: Some(FilesConfig {
                enabled: Some(true),
                paths: None,
                decode_bundles: Some(false),
            }),
            secrets: Some(SecretsConfig {
                enabled: Some(false),
                namespaces: None,
            }),
            certificates: Some(CertificatesConfig {
                enabled: Some(false),
                namespaces: None,
                managed_issuer_selector: None,
            }),
            tokens: Some(TokensConfig {
                enabled: Some(false),
                path: None,
                vault_url: None,
                token_format: Some(TokenFormat::default()),
            }),
            kubernetes: None,
        }
    }
}

impl Config {
    /// A configuration with nothing set, used as the base for overrides.
    pub fn empty() -> Self {
        Config {
            listen_address: None,
            log_level: None,
            request_timeout_secs: None,
            files: None,
            secrets: None,
            certificates: None,
            tokens: None,
            kubernetes: None,
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully parsed configuration
    /// * `Err(ConfigError::Io)` - File could not be read
    /// * `Err(ConfigError::Parse)` - File contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }

    /// Generates an example configuration file in TOML format.
    pub fn example_toml() -> String {
        let example = Config {
            listen_address: Some(DEFAULT_LISTEN_ADDRESS.to_string()),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
            files: Some(FilesConfig {
                enabled: Some(true),
                paths: Some(vec!["/etc/kubernetes/ssl".to_string()]),
                decode_bundles: Some(false),
            }),
            secrets: Some(SecretsConfig {
                enabled: Some(true),
                namespaces: Some(vec!["default".to_string(), "kube-system".to_string()]),
            }),
            certificates: Some(CertificatesConfig {
                enabled: Some(true),
                namespaces: Some(Vec::new()),
                managed_issuer_selector: Some("app.kubernetes.io/managed-by=cert-operator".to_string()),
            }),
            tokens: Some(TokensConfig {
                enabled: Some(false),
                path: Some("/etc/tokens".to_string()),
                vault_url: Some("https://vault.example.com:8200".to_string()),
                token_format: Some(TokenFormat::Versioned),
            }),
            kubernetes: Some(KubernetesConfig {
                api_url: None,
                token_path: None,
                ca_path: None,
            }),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Error generating example".to_string())
    }

    /// Validates the merged configuration into immutable settings.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let listen = self
            .listen_address
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
        let listen_address: SocketAddr = listen.parse().map_err(|e| {
            ConfigError::Validation(format!("listen address {} is invalid: {}", listen, e))
        })?;
        let request_timeout = Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );

        let files = match self.files.unwrap_or_default() {
            FilesConfig {
                enabled: Some(true),
                paths,
                decode_bundles,
            } => {
                let paths: Vec<PathBuf> = paths
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|p| !p.trim().is_empty())
                    .map(PathBuf::from)
                    .collect();
                if paths.is_empty() {
                    return Err(ConfigError::Validation(
                        "path to cert folder can not be empty".to_string(),
                    ));
                }
                Some(FileCollectorConfig {
                    paths,
                    decode_bundles: decode_bundles.unwrap_or(false),
                })
            }
            _ => None,
        };

        let secrets = match self.secrets.unwrap_or_default() {
            SecretsConfig {
                enabled: Some(true),
                namespaces,
            } => Some(SecretCollectorConfig {
                namespaces: clean_list(namespaces),
            }),
            _ => None,
        };

        let certificates = match self.certificates.unwrap_or_default() {
            CertificatesConfig {
                enabled: Some(true),
                namespaces,
                managed_issuer_selector,
            } => Some(CertificateCollectorConfig {
                namespaces: clean_list(namespaces),
                managed_issuer_selector: managed_issuer_selector
                    .filter(|s| !s.trim().is_empty()),
            }),
            _ => None,
        };

        let tokens = match self.tokens.unwrap_or_default() {
            TokensConfig {
                enabled: Some(true),
                path,
                vault_url,
                token_format,
            } => {
                let path = path.filter(|p| !p.trim().is_empty()).ok_or_else(|| {
                    ConfigError::Validation("path to token folder can not be empty".to_string())
                })?;
                let vault_url = vault_url.unwrap_or_default();
                validate_vault_url(&vault_url)?;
                Some(TokenCollectorConfig {
                    path: PathBuf::from(path),
                    vault_url,
                    token_format: token_format.unwrap_or_default(),
                })
            }
            _ => None,
        };

        if files.is_none() && secrets.is_none() && certificates.is_none() && tokens.is_none() {
            return Err(ConfigError::Validation(
                "at least one collector has to be enabled".to_string(),
            ));
        }

        let mut kubernetes = KubeClientConfig {
            timeout: request_timeout,
            ..KubeClientConfig::default()
        };
        if let Some(overrides) = self.kubernetes {
            kubernetes.api_url = overrides.api_url.filter(|u| !u.is_empty());
            if let Some(token_path) = overrides.token_path {
                kubernetes.token_path = PathBuf::from(token_path);
            }
            if let Some(ca_path) = overrides.ca_path {
                kubernetes.ca_path = PathBuf::from(ca_path);
            }
        }

        Ok(Settings {
            listen_address,
            log_level: self
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            request_timeout,
            files,
            secrets,
            certificates,
            tokens,
            kubernetes,
        })
    }
}

fn clean_list(values: Option<Vec<String>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn validate_vault_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::Validation(format!("vault URL {:?} is invalid: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "vault URL scheme {} is not supported",
            other
        ))),
    }
}

/// Splits a comma-separated command-line value, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validated configuration. Never mutated after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen_address: SocketAddr,
    pub log_level: String,
    pub request_timeout: Duration,
    pub files: Option<FileCollectorConfig>,
    pub secrets: Option<SecretCollectorConfig>,
    pub certificates: Option<CertificateCollectorConfig>,
    pub tokens: Option<TokenCollectorConfig>,
    pub kubernetes: KubeClientConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileCollectorConfig {
    pub paths: Vec<PathBuf>,
    pub decode_bundles: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecretCollectorConfig {
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertificateCollectorConfig {
    pub namespaces: Vec<String>,
    pub managed_issuer_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenCollectorConfig {
    pub path: PathBuf,
    pub vault_url: String,
    pub token_format: TokenFormat,
}

/// Errors that can occur during configuration loading and parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("IO Error: {0}")]
    Io(String),
    /// TOML parsing error (invalid syntax, type mismatch, etc.)
    #[error("Parse Error: {0}")]
    Parse(String),
    /// Validation error (missing required fields, invalid values, etc.)
    #[error("Validation Error: {0}")]
    Validation(String),
}
