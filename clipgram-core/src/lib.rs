pub mod analysis;
pub mod chat;
pub mod config;
pub mod delivery;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod records;
pub mod store;

pub use config::{load_config, ClipgramConfig};
pub use error::{ConfigError, Result};
pub use records::{
    DownloadJob, JobMessage, JobStatus, SourceCategory, StoredFile, UsageRecord,
};
