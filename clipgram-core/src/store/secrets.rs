use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

/// Credential lookup. A `None` always means "no credential available" —
/// lookup failures are logged and degraded, never propagated.
#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn get(&self, secret_id: &str) -> Option<String>;
}

/// Directory-backed secrets: one file per secret id (slashes in the id map
/// to subdirectories), trailing whitespace trimmed.
pub struct FileSecrets {
    dir: PathBuf,
}

impl FileSecrets {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SecretsStore for FileSecrets {
    async fn get(&self, secret_id: &str) -> Option<String> {
        let path = self.dir.join(secret_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let trimmed = contents.trim_end();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Err(err) => {
                warn!(secret = secret_id, error = %err, "secret unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn missing_secret_is_none() {
        let base = TempDir::new().unwrap();
        let secrets = FileSecrets::new(base.path());
        assert!(secrets.get("absent").await.is_none());
    }

    #[tokio::test]
    async fn secret_contents_are_trimmed() {
        let base = TempDir::new().unwrap();
        std::fs::create_dir_all(base.path().join("clipgram")).unwrap();
        std::fs::write(base.path().join("clipgram/inference-key"), "token-123\n").unwrap();
        let secrets = FileSecrets::new(base.path());
        assert_eq!(
            secrets.get("clipgram/inference-key").await.as_deref(),
            Some("token-123")
        );
    }
}
