//! cert-exporter binary entry point.
//!
//! Loads configuration, builds the collectors and serves `/metrics`.

use std::process::exit;

use chrono::DateTime;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cert_exporter::config::{
    split_list, CertificatesConfig, Config, FilesConfig, Merge, SecretsConfig, Settings,
    TokensConfig,
};
use cert_exporter::{server, Registry, Sample, TokenFormat};

/// Exports certificate and Vault token expiry as Prometheus metrics
#[derive(Parser, Debug)]
#[command(name = "cert-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "CERT_EXPORTER_CONFIG")]
    config: Option<String>,

    /// Address the metrics endpoint listens on
    #[arg(long, env = "CERT_EXPORTER_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Comma-separated directories holding certificate files
    #[arg(long, env = "CERT_EXPORTER_CERT_PATHS")]
    cert_paths: Option<String>,

    /// Comma-separated namespaces to inspect; all namespaces when unset
    #[arg(long, env = "CERT_EXPORTER_NAMESPACES")]
    namespaces: Option<String>,

    /// Directory holding Vault token files
    #[arg(long, env = "CERT_EXPORTER_TOKEN_PATH")]
    token_path: Option<String>,

    /// Vault server URL
    #[arg(long, env = "CERT_EXPORTER_VAULT_URL")]
    vault_url: Option<String>,

    /// Accepted Vault token shape
    #[arg(long, env = "CERT_EXPORTER_TOKEN_FORMAT")]
    token_format: Option<TokenFormat>,

    /// Enable the certificate file collector
    #[arg(long, env = "CERT_EXPORTER_ENABLE_FILES")]
    enable_files: Option<bool>,

    /// Enable the Kubernetes TLS secret collector
    #[arg(long, env = "CERT_EXPORTER_ENABLE_SECRETS")]
    enable_secrets: Option<bool>,

    /// Enable the cert-manager Certificate collector
    #[arg(long, env = "CERT_EXPORTER_ENABLE_CERTIFICATES")]
    enable_certificates: Option<bool>,

    /// Enable the Vault token collector
    #[arg(long, env = "CERT_EXPORTER_ENABLE_TOKENS")]
    enable_tokens: Option<bool>,

    /// Label selector identifying managed Issuers and ClusterIssuers
    #[arg(long, env = "CERT_EXPORTER_MANAGED_ISSUER_SELECTOR")]
    managed_issuer_selector: Option<String>,

    /// Decode every PEM block of a certificate file, not only the first
    #[arg(long, env = "CERT_EXPORTER_DECODE_BUNDLES")]
    decode_bundles: Option<bool>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "CERT_EXPORTER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Collect once, print the samples as a table and exit
    #[arg(long)]
    once: bool,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_example_config: bool,
}

impl Cli {
    /// Command-line values as a configuration layer.
    fn overrides(&self) -> Config {
        let namespaces = self.namespaces.as_deref().map(split_list);
        Config {
            listen_address: self.listen_address.clone(),
            log_level: self.log_level.clone(),
            request_timeout_secs: None,
            files: Some(FilesConfig {
                enabled: self.enable_files,
                paths: self.cert_paths.as_deref().map(split_list),
                decode_bundles: self.decode_bundles,
            }),
            secrets: Some(SecretsConfig {
                enabled: self.enable_secrets,
                namespaces: namespaces.clone(),
            }),
            certificates: Some(CertificatesConfig {
                enabled: self.enable_certificates,
                namespaces,
                managed_issuer_selector: self.managed_issuer_selector.clone(),
            }),
            tokens: Some(TokensConfig {
                enabled: self.enable_tokens,
                path: self.token_path.clone(),
                vault_url: self.vault_url.clone(),
                token_format: self.token_format,
            }),
            kubernetes: None,
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut config = Config::default();
    if let Some(path) = &cli.config {
        config = config.merge_with(Config::from_file(path)?);
    }
    let settings = config.merge_with(cli.overrides()).resolve()?;
    Ok(settings)
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_samples(samples: &[Sample]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Metric", "Labels", "Expires (UTC)", "Timestamp"]);

    for sample in samples {
        let labels = sample
            .label_names
            .iter()
            .zip(&sample.label_values)
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("\n");
        let expires = DateTime::from_timestamp(sample.value as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "invalid".to_string());
        table.add_row(vec![
            sample.metric_name.to_string(),
            labels,
            expires,
            format!("{}", sample.value),
        ]);
    }
    println!("{table}");
}

fn main() {
    let cli = Cli::parse();

    if cli.print_example_config {
        println!("{}", Config::example_toml());
        return;
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            exit(2);
        }
    };
    init_tracing(&settings.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting cert-exporter");

    // Blocking HTTP clients are created and dropped outside the async runtime.
    let registry = match Registry::from_settings(&settings) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "could not create collectors");
            exit(1);
        }
    };

    if cli.once {
        print_samples(&registry.collect_all());
        return;
    }

    let registry = match registry.into_prometheus() {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "could not register collectors");
            exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "could not start the async runtime");
            exit(1);
        }
    };
    let served = runtime.block_on(server::serve(settings.listen_address, registry.clone()));
    drop(runtime);
    drop(registry);

    if let Err(e) = served {
        tracing::error!(error = %e, "server failed");
        exit(1);
    }
}
