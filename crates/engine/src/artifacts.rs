//! Artifact storage and signed, time-limited download links.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("invalid artifact path `{0}`")]
    InvalidPath(String),
    #[error("artifact storage i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: String,
    pub size: usize,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `bytes` at `path`, replacing any previous object.
    async fn store(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError>;
    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, ArtifactError>;
    async fn exists(&self, path: &str) -> Result<bool, ArtifactError>;
    /// Paths starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArtifactError>;
    /// Returns `false` when nothing was stored at `path`.
    async fn delete(&self, path: &str) -> Result<bool, ArtifactError>;
}

/// Relative, `/`-separated, no empty, `.` or `..` segments.
fn validate_path(path: &str) -> Result<(), ArtifactError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(ArtifactError::InvalidPath(path.to_string()))
    }
}

pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ArtifactError> {
        validate_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, segment| acc.join(segment)))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io { path: path.to_path_buf(), source }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn store(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }

        // Readers never observe a half-written file.
        let partial = target.with_extension("partial");
        tokio::fs::write(&partial, bytes).await.map_err(io_error(&partial))?;
        tokio::fs::rename(&partial, &target).await.map_err(io_error(&target))?;

        Ok(ArtifactRef { path: path.to_string(), size: bytes.len() })
    }

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(path.to_string()))
            }
            Err(source) => Err(ArtifactError::Io { path: target, source }),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, ArtifactError> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target).await.map_err(io_error(&target))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArtifactError> {
        let mut found = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(ArtifactError::Io { path: dir, source }),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if relative.is_empty() { name } else { format!("{relative}/{name}") };
                let file_type = entry.file_type().await.map_err(io_error(&dir))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if key.starts_with(prefix) && !key.ends_with(".partial") {
                    found.push(key);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn delete(&self, path: &str) -> Result<bool, ArtifactError> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactError::Io { path: target, source }),
        }
    }
}

#[derive(Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn store(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, ArtifactError> {
        validate_path(path)?;
        self.objects.write().await.insert(path.to_string(), bytes.to_vec());
        Ok(ArtifactRef { path: path.to_string(), size: bytes.len() })
    }

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, ArtifactError> {
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ArtifactError> {
        let objects = self.objects.read().await;
        Ok(objects.keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }

    async fn delete(&self, path: &str) -> Result<bool, ArtifactError> {
        Ok(self.objects.write().await.remove(path).is_some())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("download link has expired")]
    Expired,
    #[error("download link signature is invalid")]
    BadSignature,
}

/// Issues and checks read-only links of the form
/// `{base_url}/artifacts/{path}?expires={unix}&signature={hex}`.
#[derive(Clone)]
pub struct LinkSigner {
    key: SecretString,
    base_url: String,
    ttl: Duration,
}

impl LinkSigner {
    pub fn new(key: SecretString, base_url: impl Into<String>, ttl: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { key, base_url, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, path: &str, now: DateTime<Utc>) -> DownloadLink {
        self.issue_with_ttl(path, now, self.ttl)
    }

    pub fn issue_with_ttl(&self, path: &str, now: DateTime<Utc>, ttl: Duration) -> DownloadLink {
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();
        let signature = self.signature(path, expires);
        DownloadLink {
            url: format!(
                "{}/artifacts/{path}?expires={expires}&signature={signature}",
                self.base_url
            ),
            expires_at,
        }
    }

    pub fn verify(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        let provided = decode_hex(signature).ok_or(LinkError::BadSignature)?;
        let mut mac = self.mac().ok_or(LinkError::BadSignature)?;
        mac.update(Self::material(path, expires).as_bytes());
        mac.verify_slice(&provided).map_err(|_| LinkError::BadSignature)?;

        if now.timestamp() > expires {
            return Err(LinkError::Expired);
        }
        Ok(())
    }

    fn material(path: &str, expires: i64) -> String {
        format!("{path}\n{expires}")
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).ok()
    }

    fn signature(&self, path: &str, expires: i64) -> String {
        match self.mac() {
            Some(mut mac) => {
                mac.update(Self::material(path, expires).as_bytes());
                encode_hex(mac.finalize().into_bytes().as_slice())
            }
            None => String::new(),
        }
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use secrecy::SecretString;

    use super::{
        ArtifactError, ArtifactStore, FilesystemArtifactStore, InMemoryArtifactStore, LinkError,
        LinkSigner,
    };

    fn signer() -> LinkSigner {
        LinkSigner::new(
            SecretString::from("test-signing-key-0123456789".to_string()),
            "https://quotes.example.test/",
            Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn filesystem_store_round_trips_and_lists_by_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemArtifactStore::new(dir.path());

        let stored = store.store("Q-1/v1/Q-1.pdf", b"%PDF-first").await.expect("store");
        assert_eq!(stored.size, 10);
        store.store("Q-1/v1/Q-1.pdf", b"%PDF-second").await.expect("overwrite");
        store.store("Q-2/v1/Q-2.pdf", b"%PDF-other").await.expect("store other");

        assert_eq!(store.retrieve("Q-1/v1/Q-1.pdf").await.expect("retrieve"), b"%PDF-second");
        assert_eq!(store.list("Q-1/").await.expect("list"), vec!["Q-1/v1/Q-1.pdf"]);
        assert_eq!(store.list("").await.expect("list all").len(), 2);

        assert!(store.delete("Q-2/v1/Q-2.pdf").await.expect("delete"));
        assert!(!store.delete("Q-2/v1/Q-2.pdf").await.expect("delete again"));
        assert!(matches!(
            store.retrieve("Q-2/v1/Q-2.pdf").await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn paths_escaping_the_root_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemArtifactStore::new(dir.path());

        for path in ["../secret.pdf", "/etc/passwd", "a//b.pdf", "", "a/./b.pdf"] {
            assert!(
                matches!(store.store(path, b"x").await, Err(ArtifactError::InvalidPath(_))),
                "{path} accepted"
            );
        }
        assert!(matches!(
            InMemoryArtifactStore::default().store("../x", b"x").await,
            Err(ArtifactError::InvalidPath(_))
        ));
    }

    #[test]
    fn issued_links_verify_until_they_expire() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).single().expect("date");
        let link = signer().issue("Q-1/v1/Q-1.pdf", now);

        assert!(link.url.starts_with("https://quotes.example.test/artifacts/Q-1/v1/Q-1.pdf?expires="));
        assert_eq!(link.expires_at, now + Duration::hours(24));

        let query = link.url.split_once('?').expect("query").1;
        let mut expires = 0;
        let mut signature = "";
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => expires = value.parse().expect("expires"),
                Some(("signature", value)) => signature = value,
                _ => {}
            }
        }

        let signer = signer();
        assert_eq!(signer.verify("Q-1/v1/Q-1.pdf", expires, signature, now), Ok(()));
        assert_eq!(
            signer.verify("Q-2/v1/Q-2.pdf", expires, signature, now),
            Err(LinkError::BadSignature)
        );
        assert_eq!(
            signer.verify("Q-1/v1/Q-1.pdf", expires + 60, signature, now),
            Err(LinkError::BadSignature)
        );
        assert_eq!(
            signer.verify("Q-1/v1/Q-1.pdf", expires, signature, now + Duration::hours(25)),
            Err(LinkError::Expired)
        );
        assert_eq!(
            signer.verify("Q-1/v1/Q-1.pdf", expires, "zz", now),
            Err(LinkError::BadSignature)
        );
    }
}
