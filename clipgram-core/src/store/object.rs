use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

/// Object storage as consumed by the pipeline: opaque keys, byte payloads,
/// and time-bounded signed URLs for link-only delivery.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Existence check. `Ok(false)` means a definitive not-found; transport
    /// or permission problems surface as errors and callers decide severity.
    async fn head(&self, key: &str) -> StoreResult<bool>;

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String>;

    /// Idempotent: deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Filesystem-backed object store. Signed URLs are `file://` URLs carrying
/// an HMAC-SHA256 token over `key|expiry`, so links can be validated without
/// consulting the store.
pub struct FsObjectStore {
    root: PathBuf,
    secret: Vec<u8>,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            secret: secret.into(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sign(&self, key: &str, expires_ts: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(format!("{key}|{expires_ts}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify_token(&self, key: &str, expires_ts: i64, token: &str) -> bool {
        let Ok(raw) = hex::decode(token) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("hmac accepts any key length");
        mac.update(format!("{key}|{expires_ts}").as_bytes());
        mac.verify_slice(&raw).is_ok() && expires_ts > Utc::now().timestamp()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn head(&self, key: &str) -> StoreResult<bool> {
        match tokio::fs::metadata(self.object_path(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                source,
                path: self.object_path(key),
            }),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> StoreResult<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| StoreError::Io { source, path })
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(source) => Err(StoreError::Io { source, path }),
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        let expires_ts = (Utc::now() + ttl).timestamp();
        let token = self.sign(key, expires_ts);
        Ok(format!(
            "file://{}?expires={}&token={}",
            self.object_path(key).display(),
            expires_ts,
            token
        ))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { source, path }),
        }
    }
}
