use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{probe_duration, AnalysisError, AnalysisOrchestrator, ProgressFn};
use crate::chat::{ChatError, ChatTransport, MessageRef};
use crate::config::ClipgramConfig;
use crate::delivery::ResultDelivery;
use crate::fetcher::{
    DownloadedArtifact, FetchError, FetchRequest, MediaFetcher, Phase, ProgressObserver,
    ProgressUpdate,
};
use crate::records::{DownloadJob, JobMessage, JobStatus, StoredFile};
use crate::store::{ObjectStore, RecordStore, SecretsStore, StoreError};

/// Short fixed preamble prepended to the raw error detail in user-facing
/// failure messages. No error codes cross the chat surface.
pub const FAILURE_PREAMBLE: &str = "Sorry, this request failed: ";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Analysis(#[from] AnalysisError),
    #[error("{0}")]
    Chat(#[from] ChatError),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("invalid source url {0}")]
    InvalidUrl(String),
    #[error("stored file not found: {0}")]
    UnknownFile(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Drives one job from dequeue to terminal deletion: fetch, upload, record,
/// deliver. Exactly this layer translates stage errors into user-visible
/// messages; everything below raises plain errors.
pub struct DownloadOrchestrator {
    fetcher: MediaFetcher,
    analysis: AnalysisOrchestrator,
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    secrets: Arc<dyn SecretsStore>,
    chat: Arc<dyn ChatTransport>,
    delivery: ResultDelivery,
    config: Arc<ClipgramConfig>,
}

struct JobProgressObserver {
    records: Arc<dyn RecordStore>,
    chat: Arc<dyn ChatTransport>,
    job_id: String,
    chat_id: String,
    progress_message: Option<MessageRef>,
}

#[async_trait]
impl ProgressObserver for JobProgressObserver {
    async fn notify(&self, update: &ProgressUpdate) {
        let status = match update.phase {
            Phase::Downloading => JobStatus::Downloading,
            Phase::PostProcessing => JobStatus::Converting,
        };
        // Both notifications are independent and best-effort; neither may
        // block or fail the download.
        if let Err(err) = self
            .records
            .update_job_progress(&self.job_id, status, update.percent, update.speed.as_deref())
            .await
        {
            warn!(job = %self.job_id, error = %err, "progress persist failed");
        }
        if let Some(message) = self.progress_message {
            let text = progress_text(status, update.percent, update.speed.as_deref());
            if let Err(err) = self.chat.edit_message(&self.chat_id, message, &text).await {
                warn!(job = %self.job_id, error = %err, "progress message edit failed");
            }
        }
    }
}

fn progress_text(status: JobStatus, percent: Option<f64>, speed: Option<&str>) -> String {
    match status {
        JobStatus::Converting => "Converting…".to_string(),
        _ => match (percent, speed) {
            (Some(percent), Some(speed)) => format!("Downloading… {percent:.1}% ({speed})"),
            (Some(percent), None) => format!("Downloading… {percent:.1}%"),
            _ => "Downloading…".to_string(),
        },
    }
}

impl DownloadOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: MediaFetcher,
        analysis: AnalysisOrchestrator,
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        secrets: Arc<dyn SecretsStore>,
        chat: Arc<dyn ChatTransport>,
        config: Arc<ClipgramConfig>,
    ) -> Self {
        let delivery = ResultDelivery::new(chat.clone(), config.delivery.clone());
        Self {
            fetcher,
            analysis,
            records,
            objects,
            secrets,
            chat,
            delivery,
            config,
        }
    }

    /// Entry point for one dequeued job. On failure the job record is
    /// deleted and the requester notified; the working directory is removed
    /// regardless of which stage failed.
    pub async fn handle_job(&self, message: JobMessage) -> PipelineResult<()> {
        let outcome = self.run_job(&message).await;

        if let Err(err) = &outcome {
            self.log_failure(&message.job_id, err);
            if let Err(delete_err) = self.records.delete_job(&message.job_id).await {
                warn!(job = %message.job_id, error = %delete_err, "job record cleanup failed");
            }
            let text = format!("{FAILURE_PREAMBLE}{err}");
            if let Err(send_err) = self.chat.send_message(&message.chat_id, &text).await {
                warn!(job = %message.job_id, error = %send_err, "failure notification failed");
            }
        }

        let workdir = self.fetcher.workdir_for(&message.job_id);
        if workdir.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
                warn!(path = %workdir.display(), error = %err, "failed to remove working directory");
            }
        }

        outcome
    }

    async fn run_job(&self, message: &JobMessage) -> PipelineResult<()> {
        url::Url::parse(&message.url)
            .map_err(|err| PipelineError::InvalidUrl(format!("{}: {err}", message.url)))?;

        // Mark "starting" before the child process produces any output, to
        // bound perceived latency.
        let mut job = DownloadJob::from_message(message);
        job.status = JobStatus::Starting;
        self.records.put_job(&job).await?;
        if let Some(progress_message) = message.progress_message {
            if let Err(err) = self
                .chat
                .edit_message(&message.chat_id, progress_message, "Starting download…")
                .await
            {
                warn!(job = %message.job_id, error = %err, "starting notification failed");
            }
        }

        let cookies = match &self.config.download.cookie_secret_id {
            Some(secret_id) => self.secrets.get(secret_id).await,
            None => None,
        };
        let request = FetchRequest {
            category: message.category,
            url: message.url.clone(),
            cookies,
            proxy: self.config.download.proxy.clone(),
        };
        let observer = JobProgressObserver {
            records: self.records.clone(),
            chat: self.chat.clone(),
            job_id: message.job_id.clone(),
            chat_id: message.chat_id.clone(),
            progress_message: message.progress_message,
        };

        let artifact = self
            .fetcher
            .fetch(&request, &message.job_id, &observer)
            .await?;
        info!(
            job = %message.job_id,
            file = %artifact.file_name(),
            size_mb = artifact.size_mb(),
            "download complete"
        );

        let key = format!(
            "{}/{}/{}",
            self.config.storage.download_prefix,
            message.category.as_str(),
            artifact.file_name()
        );
        self.upload_if_absent(&key, &artifact).await?;

        let title = artifact
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| artifact.file_name());
        let now = Utc::now();
        let stored = StoredFile {
            key: key.clone(),
            category: message.category,
            title,
            origin_url: message.url.clone(),
            owner: message.user_id.clone(),
            size_mb: artifact.size_mb(),
            created_at: now,
            expires_at: now + Duration::days(self.config.storage.retention_days),
        };
        // Concurrent duplicate inserts are silently dropped, never raised.
        self.records.create_file_if_absent(&stored).await?;
        self.records
            .add_usage(&message.user_id, message.category, artifact.size_mb())
            .await?;

        let link = self
            .objects
            .signed_url(&key, Duration::hours(self.config.storage.signed_url_ttl_hours))
            .await?;
        self.delivery
            .deliver_file(&message.chat_id, &artifact, &stored.title, &link)
            .await;

        if let Err(err) = self.records.delete_job(&message.job_id).await {
            warn!(job = %message.job_id, error = %err, "job record cleanup failed");
        }
        Ok(())
    }

    /// Check-then-put. A definitive not-found proceeds to upload; any other
    /// head error also falls through to attempting the upload.
    async fn upload_if_absent(&self, key: &str, artifact: &DownloadedArtifact) -> PipelineResult<()> {
        match self.objects.head(key).await {
            Ok(true) => {
                info!(key = %key, "object already stored, skipping upload");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "head check failed, attempting upload anyway");
            }
        }
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: artifact.path.clone(),
            })?;
        self.objects
            .put(key, bytes, artifact.kind.content_type())
            .await?;
        Ok(())
    }

    /// Runs the content-strategy analysis for a previously stored file and
    /// delivers the report. Everything is recomputed; analysis results are
    /// never cached.
    pub async fn handle_analysis(&self, chat_id: &str, key: &str) -> PipelineResult<()> {
        let label = format!("analysis-{}", Uuid::new_v4());
        let outcome = self.run_analysis(chat_id, key, &label).await;

        if let Err(err) = &outcome {
            self.log_failure(&label, err);
            let text = format!("{FAILURE_PREAMBLE}{err}");
            if let Err(send_err) = self.chat.send_message(chat_id, &text).await {
                warn!(chat = chat_id, error = %send_err, "failure notification failed");
            }
        }

        let workdir = self.fetcher.workdir_for(&label);
        if workdir.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
                warn!(path = %workdir.display(), error = %err, "failed to remove working directory");
            }
        }

        outcome
    }

    async fn run_analysis(&self, chat_id: &str, key: &str, label: &str) -> PipelineResult<()> {
        let stored = self
            .records
            .get_file(key)
            .await?
            .ok_or_else(|| PipelineError::UnknownFile(key.to_string()))?;

        let workdir = self.fetcher.workdir_for(label);
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: workdir.clone(),
            })?;
        let file_name = key.rsplit('/').next().unwrap_or("media.mp4");
        let video = workdir.join(file_name);
        let bytes = self.objects.get(key).await?;
        tokio::fs::write(&video, bytes)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: video.clone(),
            })?;

        let duration = probe_duration(&self.config.analysis.ffprobe, &video).await?;

        let progress = self.analysis_progress(chat_id).await;
        let report = self
            .analysis
            .analyze(&video, duration, &stored.title, label, progress)
            .await?;

        if let Err(err) = self
            .delivery
            .deliver_report(chat_id, &stored.title, &report.report)
            .await
        {
            warn!(chat = chat_id, error = %err, "report delivery failed");
        }
        Ok(())
    }

    fn log_failure(&self, label: &str, error: &PipelineError) {
        let path = Path::new(&self.config.paths.logs_dir).join("pipeline_failures.log");
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "{} [{}] {}", Utc::now().to_rfc3339(), label, error);
        }
    }

    /// Live-edits an "Analyzing…" message as the tracks advance. Purely
    /// best-effort; analysis proceeds without it.
    async fn analysis_progress(&self, chat_id: &str) -> Option<ProgressFn> {
        let message = match self.chat.send_message(chat_id, "Analyzing…").await {
            Ok(message) => message,
            Err(err) => {
                warn!(chat = chat_id, error = %err, "analysis progress message failed");
                return None;
            }
        };
        let chat = self.chat.clone();
        let chat_id = chat_id.to_string();
        Some(Arc::new(move |stage: &str| {
            let chat = chat.clone();
            let chat_id = chat_id.clone();
            let text = format!("Analyzing… {stage}");
            tokio::spawn(async move {
                if let Err(err) = chat.edit_message(&chat_id, message, &text).await {
                    warn!(chat = %chat_id, error = %err, "analysis progress edit failed");
                }
            });
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_text_formats_by_status() {
        assert_eq!(
            progress_text(JobStatus::Downloading, Some(42.0), Some("1.2MiB/s")),
            "Downloading… 42.0% (1.2MiB/s)"
        );
        assert_eq!(
            progress_text(JobStatus::Downloading, Some(42.0), None),
            "Downloading… 42.0%"
        );
        assert_eq!(progress_text(JobStatus::Converting, Some(99.0), None), "Converting…");
    }
}
