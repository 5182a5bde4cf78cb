use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::fs;

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed object metadata: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobMeta {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    /// RFC 3339
    pub updated: String,
}

/// Flat key/value object store with public URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>, StorageError>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn make_public(&self, key: &str) -> Result<(), StorageError>;
    fn public_url(&self, key: &str) -> String;
}

/// Rejects empty keys, absolute paths, `.`/`..` segments and the sidecar suffix.
pub fn validate_key(key: &str) -> Result<&str, StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.ends_with(META_SUFFIX)
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(key)
}

pub fn guess_content_type(key: &str) -> String {
    let ext = key.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg".to_string(),
        Some("wav") => "audio/wav".to_string(),
        Some("m4a") => "audio/mp4".to_string(),
        Some("ogg") => "audio/ogg".to_string(),
        Some("json") => mime::APPLICATION_JSON.to_string(),
        Some("png") => mime::IMAGE_PNG.to_string(),
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG.to_string(),
        Some("txt") | Some("md") => mime::TEXT_PLAIN_UTF_8.to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

fn public_url_for(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), encode_key(key))
}

/// Percent-encodes everything outside the URL-unreserved set, keeping `/`.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    public: bool,
}

/// Objects as plain files under `root`; content type and visibility live in a
/// `<key>.meta.json` sidecar next to each object.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_key(key)?))
    }

    fn sidecar_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_sidecar(path: &Path) -> Option<Sidecar> {
        let raw = fs::read(Self::sidecar_for(path)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    async fn meta_for(&self, key: String, path: &Path) -> Result<BlobMeta, StorageError> {
        let metadata = fs::metadata(path).await?;
        let updated: DateTime<Utc> = metadata.modified()?.into();
        let content_type = match Self::read_sidecar(path).await {
            Some(sidecar) => sidecar.content_type,
            None => guess_content_type(&key),
        };
        Ok(BlobMeta {
            key,
            size: metadata.len(),
            content_type,
            updated: updated.to_rfc3339(),
        })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>, StorageError> {
        let mut found = Vec::new();
        if fs::metadata(&self.root).await.is_err() {
            return Ok(found);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(META_SUFFIX) || !key.starts_with(prefix) {
                    continue;
                }
                found.push(self.meta_for(key, &path).await?);
            }
        }

        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;

        let public = Self::read_sidecar(&path).await.is_some_and(|s| s.public);
        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            public,
        };
        fs::write(Self::sidecar_for(&path), serde_json::to_vec(&sidecar)?).await?;
        tracing::debug!("Stored {} ({} bytes, {})", key, data.len(), content_type);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        let _ = fs::remove_file(Self::sidecar_for(&path)).await;
        Ok(())
    }

    async fn make_public(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if fs::metadata(&path).await.is_err() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let content_type = match Self::read_sidecar(&path).await {
            Some(sidecar) => sidecar.content_type,
            None => guess_content_type(key),
        };
        let sidecar = Sidecar {
            content_type,
            public: true,
        };
        fs::write(Self::sidecar_for(&path), serde_json::to_vec(&sidecar)?).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(&self.public_base_url, key)
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    content_type: String,
    updated: DateTime<Utc>,
    public: bool,
}

/// In-process store for tests and demos.
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredBlob>>,
    public_base_url: String,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn is_public(&self, key: &str) -> bool {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects.get(key).is_some_and(|b| b.public)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>, StorageError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| BlobMeta {
                key: key.clone(),
                size: blob.data.len() as u64,
                content_type: blob.content_type.clone(),
                updated: blob.updated.to_rfc3339(),
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects.get(key).map(|b| b.data.clone()))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let public = objects.get(key).is_some_and(|b| b.public);
        objects.insert(
            key.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
                updated: Utc::now(),
                public,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn make_public(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        match objects.get_mut(key) {
            Some(blob) => {
                blob.public = true;
                Ok(())
            }
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(&self.public_base_url, key)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires: i64,
}

/// Issues and checks time-limited upload URLs served by `PUT /api/blobs/{key}`.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    base_url: String,
    ttl_secs: i64,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, base_url: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Secret that only lives as long as the process.
    pub fn random_secret() -> String {
        let bytes: [u8; 32] = rand::random();
        hex::encode(bytes)
    }

    fn signature(&self, method: &str, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(method.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn sign(&self, key: &str, method: &str, now: DateTime<Utc>) -> SignedUrl {
        let expires = now.timestamp().saturating_add(self.ttl_secs);
        let signature = self.signature(method, key, expires);
        SignedUrl {
            url: format!(
                "{}/api/blobs/{}?method={}&expires={}&signature={}",
                self.base_url,
                encode_key(key),
                method,
                expires,
                signature
            ),
            expires,
        }
    }

    pub fn verify(&self, key: &str, method: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let expected = self.signature(method, key, expires);
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn rejects_escaping_keys() {
        for key in ["", "/etc/passwd", "../x.mp3", "a//b.mp3", "a/./b", "x.mp3.meta.json", "a\\b"] {
            assert!(validate_key(key).is_err(), "{key}");
        }
        assert!(validate_key("boringhistory/HIST001.mp3").is_ok());
    }

    #[test]
    fn signed_urls_verify_until_expiry() {
        let signer = UrlSigner::new("s3cret", "http://localhost:8899/", 900);
        let now = Utc::now();
        let signed = signer.sign("archive/AB12CD34_boring_female.mp3", "PUT", now);

        assert!(signed.url.starts_with("http://localhost:8899/api/blobs/archive/AB12CD34_boring_female.mp3?method=PUT&expires="));
        let signature = signed.url.rsplit_once("signature=").unwrap().1;

        let key = "archive/AB12CD34_boring_female.mp3";
        assert!(signer.verify(key, "PUT", signed.expires, signature, now));
        assert!(!signer.verify(key, "GET", signed.expires, signature, now));
        assert!(!signer.verify("other.mp3", "PUT", signed.expires, signature, now));
        assert!(!signer.verify(key, "PUT", signed.expires + 1, signature, now));
        assert!(!signer.verify(key, "PUT", signed.expires, signature, now + Duration::seconds(901)));
    }

    #[test]
    fn keys_are_percent_encoded_in_urls() {
        assert_eq!(encode_key("a b/ç.mp3"), "a%20b/%C3%A7.mp3");
    }

    #[tokio::test]
    async fn local_store_round_trips_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://localhost:8899/media");

        store
            .put("boringhistory/HIST001.mp3", Bytes::from_static(b"ID3"), "audio/mpeg")
            .await
            .unwrap();
        store
            .put("history-audio-list.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();

        let all = store.list("").await.unwrap();
        assert_eq!(
            all.iter().map(|m| m.key.as_str()).collect::<Vec<_>>(),
            vec!["boringhistory/HIST001.mp3", "history-audio-list.json"]
        );
        assert_eq!(all[0].content_type, "audio/mpeg");
        assert_eq!(all[0].size, 3);

        let only = store.list("boringhistory/").await.unwrap();
        assert_eq!(only.len(), 1);

        assert_eq!(
            store.get("boringhistory/HIST001.mp3").await.unwrap().unwrap(),
            Bytes::from_static(b"ID3")
        );
        assert!(store.get("missing.mp3").await.unwrap().is_none());
        assert_eq!(
            store.public_url("boringhistory/HIST001.mp3"),
            "http://localhost:8899/media/boringhistory/HIST001.mp3"
        );

        store.make_public("boringhistory/HIST001.mp3").await.unwrap();
        store.delete("boringhistory/HIST001.mp3").await.unwrap();
        assert!(matches!(
            store.delete("boringhistory/HIST001.mp3").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(store.make_public("nope.mp3").await, Err(StorageError::NotFound(_))));
        assert!(store.list("boringhistory/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_tracks_visibility() {
        let store = MemoryBlobStore::new("http://cdn.test");
        store.put("a.mp3", Bytes::from_static(b"x"), "audio/mpeg").await.unwrap();
        assert!(!store.is_public("a.mp3"));
        store.make_public("a.mp3").await.unwrap();
        assert!(store.is_public("a.mp3"));

        store.put("a.mp3", Bytes::from_static(b"yy"), "audio/mpeg").await.unwrap();
        assert!(store.is_public("a.mp3"));
        assert_eq!(store.list("").await.unwrap()[0].size, 2);
    }
}
