use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::MessageRef;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid source category: {0}")]
    InvalidCategory(String),
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
}

/// Request origin plus media length class. Drives format/extraction policy
/// and the storage key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    /// Long-form source, audio-only extraction.
    TubeAudio,
    /// Long-form source, combined video+audio.
    TubeVideo,
    /// Short-form clip source, combined video+audio.
    ClipVideo,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::TubeAudio => "tube_audio",
            SourceCategory::TubeVideo => "tube_video",
            SourceCategory::ClipVideo => "clip_video",
        }
    }

    pub fn audio_only(&self) -> bool {
        matches!(self, SourceCategory::TubeAudio)
    }

    pub const ALL: [SourceCategory; 3] = [
        SourceCategory::TubeAudio,
        SourceCategory::TubeVideo,
        SourceCategory::ClipVideo,
    ];
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceCategory {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tube_audio" => Ok(Self::TubeAudio),
            "tube_video" => Ok(Self::TubeVideo),
            "clip_video" => Ok(Self::ClipVideo),
            other => Err(RecordError::InvalidCategory(other.to_string())),
        }
    }
}

/// Pre-terminal job states. There is no stored terminal state: completion and
/// failure are both signaled by deleting the job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Starting,
    Downloading,
    Converting,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Converting => "converting",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "starting" => Ok(Self::Starting),
            "downloading" => Ok(Self::Downloading),
            "converting" => Ok(Self::Converting),
            other => Err(RecordError::InvalidStatus(other.to_string())),
        }
    }
}

/// One dequeued job description, as delivered by the external queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: String,
    pub category: SourceCategory,
    pub url: String,
    pub user_id: String,
    pub chat_id: String,
    /// Message to live-edit with download progress, when the transport
    /// handed one back at accept time.
    pub progress_message: Option<MessageRef>,
}

/// Live job record. Written only by the single execution context that owns
/// the job id; deleted on terminal success or failure.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub job_id: String,
    pub category: SourceCategory,
    pub url: String,
    pub user_id: String,
    pub chat_id: String,
    pub status: JobStatus,
    pub percent: Option<f64>,
    pub speed: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn from_message(message: &JobMessage) -> Self {
        Self {
            job_id: message.job_id.clone(),
            category: message.category,
            url: message.url.clone(),
            user_id: message.user_id.clone(),
            chat_id: message.chat_id.clone(),
            status: JobStatus::Queued,
            percent: None,
            speed: None,
            updated_at: None,
        }
    }
}

/// Metadata record for an uploaded artifact. The key doubles as the
/// deduplication key; creation is first-writer-wins.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub key: String,
    pub category: SourceCategory,
    pub title: String,
    pub origin_url: String,
    pub owner: String,
    pub size_mb: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Per-user counters. Mutated additively on every successful job, never
/// deleted by normal operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub request_count: i64,
    pub total_mb: f64,
    pub tube_audio_mb: f64,
    pub tube_video_mb: f64,
    pub clip_video_mb: f64,
}

impl UsageRecord {
    pub fn category_mb(&self, category: SourceCategory) -> f64 {
        match category {
            SourceCategory::TubeAudio => self.tube_audio_mb,
            SourceCategory::TubeVideo => self.tube_video_mb,
            SourceCategory::ClipVideo => self.clip_video_mb,
        }
    }
}
