use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collector::{sweep, Collector, SweepReport};
use crate::config::TokenCollectorConfig;
use crate::error::Skipped;
use crate::fs::Filesystem;
use crate::metrics::{MetricShape, Sample, LABEL_PATH, TOKEN_NOT_AFTER};
use crate::source::{TokenArtifact, TokenSource};
use crate::token::{TokenExpiry, TokenInspector, TokenIntrospector};

/// Vault tokens kept one per file in a directory.
pub struct TokenCollector {
    source: TokenSource,
    inspector: TokenInspector<Arc<dyn TokenIntrospector>>,
}

impl TokenCollector {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        introspector: Arc<dyn TokenIntrospector>,
        config: &TokenCollectorConfig,
    ) -> Self {
        TokenCollector {
            source: TokenSource::new(fs, config.path.clone()),
            inspector: TokenInspector::new(introspector, config.token_format),
        }
    }

    pub fn sweep(&self) -> SweepReport {
        sweep(self.name(), &self.source, |token| self.token_sample(token))
    }

    fn token_sample(&self, token: TokenArtifact) -> Result<Vec<Sample>, Skipped> {
        let expiry = self
            .inspector
            .inspect(&token.first_line)
            .map_err(|reason| Skipped::new(token.reference.clone(), reason))?;

        match &expiry {
            TokenExpiry::At(not_after) => tracing::debug!(
                collector = self.name(),
                artifact = %token.reference,
                not_after,
                "adding to the metrics"
            ),
            TokenExpiry::Unreachable(details) => tracing::error!(
                collector = self.name(),
                artifact = %token.reference,
                error = %details,
                "token lookup failed, reporting it as expired"
            ),
        }

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_PATH.to_string(), token.reference.path_label());
        Ok(vec![TOKEN_NOT_AFTER.sample(expiry.sample_value(), &labels)])
    }
}

impl Collector for TokenCollector {
    fn name(&self) -> &'static str {
        "token"
    }

    fn describe(&self) -> Vec<&'static MetricShape> {
        vec![&TOKEN_NOT_AFTER]
    }

    fn collect(&self) -> Vec<Sample> {
        self.sweep().samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExporterError, SkipReason};
    use crate::fs::OsFilesystem;
    use crate::token::TokenFormat;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    const GOOD: &str = "s.AAAAAAAAAAAAAAAAAAAAAAAA";
    const NEVER: &str = "s.BBBBBBBBBBBBBBBBBBBBBBBB";
    const REVOKED: &str = "s.CCCCCCCCCCCCCCCCCCCCCCCC";

    struct FakeVault {
        lookups: HashMap<&'static str, Value>,
    }

    impl TokenIntrospector for FakeVault {
        fn health(&self) -> Result<(), ExporterError> {
            Ok(())
        }

        fn lookup_self(&self, token: &str) -> Result<Value, ExporterError> {
            self.lookups
                .get(token)
                .cloned()
                .ok_or_else(|| ExporterError::RemoteCall {
                    endpoint: "v1/auth/token/lookup-self".to_string(),
                    details: "403 permission denied".to_string(),
                })
        }
    }

    #[test]
    fn test_token_collector() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a-good"), format!("VAULT_TOKEN={}\n", GOOD)).unwrap();
        fs::write(dir.path().join("b-never"), NEVER).unwrap();
        fs::write(dir.path().join("c-revoked"), REVOKED).unwrap();
        fs::write(dir.path().join("d-garbage"), "not a token").unwrap();

        let mut lookups = HashMap::new();
        lookups.insert(GOOD, json!({ "expire_time": "2025-01-01T00:00:00.000000Z" }));
        lookups.insert(NEVER, json!({ "expire_time": null }));

        let collector = TokenCollector::new(
            Arc::new(OsFilesystem),
            Arc::new(FakeVault { lookups }),
            &TokenCollectorConfig {
                path: dir.path().to_path_buf(),
                vault_url: "http://127.0.0.1:8200".to_string(),
                token_format: TokenFormat::Versioned,
            },
        );
        let report = collector.sweep();

        let values: Vec<(String, f64)> = report
            .samples
            .iter()
            .map(|s| (s.label(LABEL_PATH).unwrap_or_default().to_string(), s.value))
            .collect();
        assert_eq!(
            values,
            vec![
                (dir.path().join("a-good").display().to_string(), 1_735_689_600.0),
                (dir.path().join("c-revoked").display().to_string(), 0.0),
            ]
        );

        let reasons: Vec<&SkipReason> = report.skipped.iter().map(|s| &s.reason).collect();
        assert_eq!(reasons.len(), 2);
        assert_eq!(reasons[0], &SkipReason::NoExpiration);
        assert!(matches!(reasons[1], SkipReason::DecodeError(_)));
    }
}
