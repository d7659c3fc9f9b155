use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to spawn downloader {tool}: {source}")]
    Spawn { source: io::Error, tool: String },
    #[error("download timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("downloader exited with status {status:?}: {stderr}")]
    Tool {
        status: Option<i32>,
        stderr: String,
    },
    #[error("downloader produced no output file")]
    MissingOutput,
    #[error("downloader produced {count} candidate output files")]
    AmbiguousOutput { count: usize },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type FetchResult<T> = Result<T, FetchError>;
