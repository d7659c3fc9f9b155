mod object;
mod secrets;
mod sqlite;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::records::{DownloadJob, JobStatus, SourceCategory, StoredFile, UsageRecord};

pub use object::{FsObjectStore, ObjectStore};
pub use secrets::{FileSecrets, SecretsStore};
pub use sqlite::{SqliteRecordStore, SqliteRecordStoreBuilder};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open records database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on records database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("records path not configured")]
    MissingStore,
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value record store, specialized to the three record families. The
/// only verbs are unconditional put/delete (job progress), conditional
/// create (file dedup), additive update (usage counters), and scan.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_job(&self, job: &DownloadJob) -> StoreResult<()>;

    /// Last-writer-wins progress update. Missing rows are not an error: the
    /// record may already have been deleted by a terminal transition.
    async fn update_job_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        percent: Option<f64>,
        speed: Option<&str>,
    ) -> StoreResult<()>;

    async fn delete_job(&self, job_id: &str) -> StoreResult<()>;

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<DownloadJob>>;

    /// First-writer-wins conditional create. Returns false when the key
    /// already existed; the caller must not treat that as a failure.
    async fn create_file_if_absent(&self, file: &StoredFile) -> StoreResult<bool>;

    async fn get_file(&self, key: &str) -> StoreResult<Option<StoredFile>>;

    async fn list_files(&self) -> StoreResult<Vec<StoredFile>>;

    /// Administrative bulk delete. Removes file records only; usage
    /// statistics are preserved.
    async fn purge_files(&self) -> StoreResult<usize>;

    async fn add_usage(
        &self,
        user_id: &str,
        category: SourceCategory,
        size_mb: f64,
    ) -> StoreResult<()>;

    async fn get_usage(&self, user_id: &str) -> StoreResult<Option<UsageRecord>>;
}
