//! Where candidate artifacts come from.
//!
//! Every source is split into roots (a configured directory, a namespace, the
//! whole cluster). A root either enumerates or fails as a whole; one failing
//! root never stops the others. Per-artifact problems are yielded in-line as
//! [`Skipped`] so the collector can log them and move on.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ExporterError, SkipReason, Skipped};
use crate::fs::Filesystem;
use crate::kube::{
    DynamicObject, KubeApi, ListParams, Secret, CERTIFICATES, TLS_SECRET_FIELD_SELECTOR,
};
use crate::metrics::{LABEL_CERTIFICATE_NAME, LABEL_NAME, LABEL_NAMESPACE, LABEL_SECRET_KEY};
use crate::model::{ArtifactRef, RawArtifact};

/// Secret data keys inspected, in order.
pub const SECRET_KEYS: [&str; 2] = ["ca.crt", "tls.crt"];

/// Annotation cert-manager puts on the secrets it issues.
pub const CERTIFICATE_NAME_ANNOTATION: &str = "cert-manager.io/certificate-name";

/// Lazy, single-use sequence of artifacts from one root.
pub type Artifacts<'a, T> = Box<dyn Iterator<Item = Result<T, Skipped>> + 'a>;

/// A family of artifact roots that can be enumerated once per sweep.
pub trait ArtifactSource {
    type Root: fmt::Display;
    type Artifact;

    fn roots(&self) -> Vec<Self::Root>;

    /// Fails with [`ExporterError::SourceUnavailable`] when the root itself
    /// cannot be reached.
    fn enumerate<'a>(&'a self, root: &Self::Root)
        -> Result<Artifacts<'a, Self::Artifact>, ExporterError>;
}

/// Namespaces a Kubernetes source lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    /// One unscoped list call
    All,
    Named(String),
}

impl NamespaceScope {
    /// Every namespace when `namespaces` is empty, otherwise each of them.
    pub fn from_filter(namespaces: &[String]) -> Vec<NamespaceScope> {
        if namespaces.is_empty() {
            vec![NamespaceScope::All]
        } else {
            namespaces
                .iter()
                .map(|ns| NamespaceScope::Named(ns.clone()))
                .collect()
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            NamespaceScope::All => None,
            NamespaceScope::Named(ns) => Some(ns.as_str()),
        }
    }
}

impl fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceScope::All => write!(f, "all namespaces"),
            NamespaceScope::Named(ns) => write!(f, "namespace {}", ns),
        }
    }
}

/// Raw bytes plus the labels the source already knows about them.
#[derive(Debug, Clone)]
pub struct LabeledArtifact {
    pub raw: RawArtifact,
    pub labels: BTreeMap<String, String>,
}

fn unavailable(root: &impl fmt::Display, details: impl fmt::Display) -> ExporterError {
    ExporterError::SourceUnavailable {
        source_name: root.to_string(),
        details: details.to_string(),
    }
}

fn read_skip(reference: ArtifactRef, error: io::Error) -> Skipped {
    let reason = match error.kind() {
        io::ErrorKind::NotFound => SkipReason::PathMissing,
        _ => SkipReason::SourceUnavailable(error.to_string()),
    };
    Skipped::new(reference, reason)
}

/// A configured directory, kept as a path and only rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory(pub PathBuf);

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Certificate files below the configured directories.
pub struct FileSource {
    fs: Arc<dyn Filesystem>,
    paths: Vec<PathBuf>,
}

impl FileSource {
    pub fn new(fs: Arc<dyn Filesystem>, paths: Vec<PathBuf>) -> Self {
        FileSource { fs, paths }
    }
}

impl ArtifactSource for FileSource {
    type Root = Directory;
    type Artifact = RawArtifact;

    fn roots(&self) -> Vec<Directory> {
        self.paths.iter().cloned().map(Directory).collect()
    }

    fn enumerate<'a>(&'a self, root: &Directory) -> Result<Artifacts<'a, RawArtifact>, ExporterError> {
        let root_path = root.0.clone();
        if !self.fs.dir_exists(&root_path) {
            return Err(unavailable(root, "folder with certs has to exist"));
        }

        let fs = &self.fs;
        let entries = fs.walk(&root_path);
        let walk = entries.map(move |entry| match entry {
            Ok(path) => match fs.read_file(&path) {
                Ok(payload) => Ok(RawArtifact::new(ArtifactRef::File(path), payload)),
                Err(e) => Err(read_skip(ArtifactRef::File(path), e)),
            },
            Err(e) => Err(Skipped::new(
                ArtifactRef::File(root_path.clone()),
                SkipReason::SourceUnavailable(e.to_string()),
            )),
        });
        Ok(Box::new(walk))
    }
}

/// `ca.crt` and `tls.crt` of every TLS secret.
pub struct SecretSource {
    api: Arc<dyn KubeApi>,
    namespaces: Vec<String>,
}

impl SecretSource {
    pub fn new(api: Arc<dyn KubeApi>, namespaces: Vec<String>) -> Self {
        SecretSource { api, namespaces }
    }
}

fn secret_artifact(secret: &Secret, scope: &NamespaceScope, key: &str) -> Result<LabeledArtifact, Skipped> {
    let namespace = match (secret.metadata.namespace.as_str(), scope.namespace()) {
        ("", Some(ns)) => ns,
        (ns, _) => ns,
    };
    let reference = ArtifactRef::SecretKey {
        namespace: namespace.to_string(),
        name: secret.metadata.name.clone(),
        key: key.to_string(),
    };

    let payload = match secret.data_bytes(key) {
        None => return Err(Skipped::new(reference, SkipReason::PathMissing)),
        Some(Err(e)) => return Err(Skipped::new(reference, e.into())),
        Some(Ok(payload)) => payload,
    };

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), secret.metadata.name.clone());
    labels.insert(LABEL_NAMESPACE.to_string(), namespace.to_string());
    labels.insert(LABEL_SECRET_KEY.to_string(), key.to_string());
    labels.insert(
        LABEL_CERTIFICATE_NAME.to_string(),
        secret
            .annotation(CERTIFICATE_NAME_ANNOTATION)
            .unwrap_or_default()
            .to_string(),
    );

    Ok(LabeledArtifact {
        raw: RawArtifact::new(reference, payload),
        labels,
    })
}

impl ArtifactSource for SecretSource {
    type Root = NamespaceScope;
    type Artifact = LabeledArtifact;

    fn roots(&self) -> Vec<NamespaceScope> {
        NamespaceScope::from_filter(&self.namespaces)
    }

    fn enumerate<'a>(
        &'a self,
        root: &NamespaceScope,
    ) -> Result<Artifacts<'a, LabeledArtifact>, ExporterError> {
        let secrets = self
            .api
            .list_secrets(root.namespace(), TLS_SECRET_FIELD_SELECTOR)
            .map_err(|e| unavailable(root, e))?;

        let scope = root.clone();
        let artifacts = secrets.into_iter().flat_map(move |secret| {
            SECRET_KEYS
                .iter()
                .map(|key| secret_artifact(&secret, &scope, key))
                .collect::<Vec<_>>()
        });
        Ok(Box::new(artifacts))
    }
}

/// cert-manager Certificate resources.
pub struct CertificateSource {
    api: Arc<dyn KubeApi>,
    namespaces: Vec<String>,
}

impl CertificateSource {
    pub fn new(api: Arc<dyn KubeApi>, namespaces: Vec<String>) -> Self {
        CertificateSource { api, namespaces }
    }
}

impl ArtifactSource for CertificateSource {
    type Root = NamespaceScope;
    type Artifact = DynamicObject;

    fn roots(&self) -> Vec<NamespaceScope> {
        NamespaceScope::from_filter(&self.namespaces)
    }

    fn enumerate<'a>(
        &'a self,
        root: &NamespaceScope,
    ) -> Result<Artifacts<'a, DynamicObject>, ExporterError> {
        let objects = self
            .api
            .list_custom_resources(&CERTIFICATES, root.namespace(), &ListParams::default())
            .map_err(|e| unavailable(root, e))?;
        Ok(Box::new(objects.into_iter().map(Ok)))
    }
}

/// First line of a token file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenArtifact {
    pub reference: ArtifactRef,
    pub first_line: String,
}

/// Files directly inside the token directory.
pub struct TokenSource {
    fs: Arc<dyn Filesystem>,
    dir: PathBuf,
}

impl TokenSource {
    pub fn new(fs: Arc<dyn Filesystem>, dir: PathBuf) -> Self {
        TokenSource { fs, dir }
    }
}

impl ArtifactSource for TokenSource {
    type Root = Directory;
    type Artifact = TokenArtifact;

    fn roots(&self) -> Vec<Directory> {
        vec![Directory(self.dir.clone())]
    }

    fn enumerate<'a>(&'a self, root: &Directory) -> Result<Artifacts<'a, TokenArtifact>, ExporterError> {
        let dir = root.0.as_path();
        if !self.fs.dir_exists(dir) {
            return Err(unavailable(root, "folder with tokens has to exist"));
        }
        let files = self.fs.list_files(dir).map_err(|e| unavailable(root, e))?;
        if files.is_empty() {
            tracing::info!(path = %root, "token folder is empty");
        }

        let fs = &self.fs;
        let tokens = files.into_iter().map(move |path| {
            let reference = ArtifactRef::TokenFile(path.clone());
            match fs.read_first_line(&path) {
                Ok(first_line) => Ok(TokenArtifact {
                    reference,
                    first_line,
                }),
                Err(e) => Err(read_skip(reference, e)),
            }
        });
        Ok(Box::new(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OsFilesystem;
    use crate::kube::{GroupVersionResource, ObjectMeta};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::fs;
    use tempfile::tempdir;

    struct FakeKube {
        secrets: Vec<Secret>,
    }

    impl KubeApi for FakeKube {
        fn list_secrets(
            &self,
            namespace: Option<&str>,
            field_selector: &str,
        ) -> Result<Vec<Secret>, ExporterError> {
            assert_eq!(field_selector, TLS_SECRET_FIELD_SELECTOR);
            match namespace {
                Some("broken") => Err(ExporterError::RemoteCall {
                    endpoint: "/api/v1/namespaces/broken/secrets".to_string(),
                    details: "forbidden".to_string(),
                }),
                _ => Ok(self.secrets.clone()),
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

    fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                ..ObjectMeta::default()
            },
            secret_type: "kubernetes.io/tls".to_string(),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), STANDARD.encode(v)))
                .collect(),
        }
    }

    #[test]
    fn test_file_source_missing_root() {
        let source = FileSource::new(Arc::new(OsFilesystem), vec![PathBuf::from("/nonexistent/certs")]);
        let roots = source.roots();
        match source.enumerate(&roots[0]) {
            Err(ExporterError::SourceUnavailable { details, .. }) => {
                assert_eq!(details, "folder with certs has to exist")
            }
            _ => panic!("Expected SourceUnavailable"),
        };
    }

    #[test]
    fn test_file_source_reads_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.crt"), "a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.crt"), "b").unwrap();

        let source = FileSource::new(Arc::new(OsFilesystem), vec![dir.path().to_path_buf()]);
        let root = source.roots().remove(0);
        let payloads: Vec<Vec<u8>> = source
            .enumerate(&root)
            .unwrap()
            .map(|a| a.unwrap().payload)
            .collect();
        assert_eq!(payloads, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_source_non_utf8_root() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let root = dir.path().join(OsStr::from_bytes(b"certs-\xff"));
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.crt"), "a").unwrap();

        let source = FileSource::new(Arc::new(OsFilesystem), vec![root.clone()]);
        let roots = source.roots();
        assert_eq!(roots, vec![Directory(root)]);
        let artifacts: Vec<_> = source.enumerate(&roots[0]).unwrap().collect();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].is_ok());
    }

    #[test]
    fn test_secret_source_labels_and_missing_keys() {
        let mut web = secret("web-tls", &[("tls.crt", "pem")]);
        web.metadata
            .annotations
            .insert(CERTIFICATE_NAME_ANNOTATION.to_string(), "web".to_string());
        let source = SecretSource::new(Arc::new(FakeKube { secrets: vec![web] }), Vec::new());

        let roots = source.roots();
        assert_eq!(roots, vec![NamespaceScope::All]);
        let artifacts: Vec<_> = source.enumerate(&roots[0]).unwrap().collect();
        assert_eq!(artifacts.len(), 2);

        let skipped = artifacts[0].as_ref().unwrap_err();
        assert_eq!(skipped.reason, SkipReason::PathMissing);
        assert_eq!(skipped.artifact.to_string(), "default/web-tls[ca.crt]");

        let tls = artifacts[1].as_ref().unwrap();
        assert_eq!(tls.raw.payload, b"pem".to_vec());
        assert_eq!(tls.labels[LABEL_SECRET_KEY], "tls.crt");
        assert_eq!(tls.labels[LABEL_CERTIFICATE_NAME], "web");
    }

    #[test]
    fn test_secret_source_failing_namespace() {
        let source = SecretSource::new(
            Arc::new(FakeKube { secrets: Vec::new() }),
            vec!["default".to_string(), "broken".to_string()],
        );
        let roots = source.roots();
        assert!(source.enumerate(&roots[0]).is_ok());
        match source.enumerate(&roots[1]) {
            Err(ExporterError::SourceUnavailable { source_name, .. }) => {
                assert_eq!(source_name, "namespace broken")
            }
            _ => panic!("Expected SourceUnavailable"),
        };
    }

    #[test]
    fn test_token_source_first_lines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b"), "second\nignored").unwrap();
        fs::write(dir.path().join("a"), "first").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let source = TokenSource::new(Arc::new(OsFilesystem), dir.path().to_path_buf());
        let root = source.roots().remove(0);
        let lines: Vec<String> = source
            .enumerate(&root)
            .unwrap()
            .map(|t| t.unwrap().first_line)
            .collect();
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }
}
