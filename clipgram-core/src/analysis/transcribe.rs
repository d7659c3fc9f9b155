use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::config::TranscriptionSection;
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("speech endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("speech response malformed: {0}")]
    Malformed(String),
    #[error("transcription failed: {0}")]
    JobFailed(String),
    #[error("transcription did not finish within {attempts} polls")]
    Timeout { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("io error reading audio: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechJobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechJob {
    pub name: String,
    pub status: SpeechJobStatus,
    pub result_uri: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartJobRequest {
    pub name: String,
    pub media_uri: String,
    pub media_format: String,
    pub language_code: String,
}

/// Asynchronous speech-to-text service: submit a job, poll it, fetch the
/// result document via the URI it hands back.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn start_job(&self, request: &StartJobRequest) -> Result<(), SpeechError>;

    async fn get_job(&self, name: &str) -> Result<SpeechJob, SpeechError>;

    async fn fetch_result(&self, uri: &str) -> Result<String, SpeechError>;
}

pub struct HttpSpeechToText {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSpeechToText {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<String, SpeechError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn start_job(&self, request: &StartJobRequest) -> Result<(), SpeechError> {
        let response = self
            .client
            .post(format!("{}/jobs", self.endpoint.trim_end_matches('/')))
            .json(request)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<SpeechJob, SpeechError> {
        let response = self
            .client
            .get(format!(
                "{}/jobs/{}",
                self.endpoint.trim_end_matches('/'),
                name
            ))
            .send()
            .await?;
        let body = Self::check(response).await?;
        serde_json::from_str(&body).map_err(|err| SpeechError::Malformed(err.to_string()))
    }

    async fn fetch_result(&self, uri: &str) -> Result<String, SpeechError> {
        let response = self.client.get(uri).send().await?;
        Self::check(response).await
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptDocument {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptAlternative>,
}

#[derive(Debug, Deserialize)]
struct TranscriptAlternative {
    transcript: String,
}

/// The first transcript alternative is the one delivered downstream.
fn parse_transcript(body: &str) -> Result<String, SpeechError> {
    let parsed: TranscriptDocument = serde_json::from_str(body)
        .map_err(|err| SpeechError::Malformed(format!("invalid transcript document: {err}")))?;
    parsed
        .results
        .transcripts
        .into_iter()
        .next()
        .map(|alt| alt.transcript)
        .ok_or_else(|| SpeechError::Malformed("transcript document has no alternatives".into()))
}

/// Uploads audio to a transient object-storage location, runs one
/// transcription job to a terminal state, and cleans the upload up.
pub struct TranscriptionClient {
    objects: Arc<dyn ObjectStore>,
    speech: Arc<dyn SpeechToText>,
    config: TranscriptionSection,
    temp_prefix: String,
}

impl TranscriptionClient {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        speech: Arc<dyn SpeechToText>,
        config: TranscriptionSection,
        temp_prefix: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            speech,
            config,
            temp_prefix: temp_prefix.into(),
        }
    }

    pub async fn transcribe(&self, audio: &Path, label: &str) -> Result<String, SpeechError> {
        let key = format!(
            "{}/{}_{}.wav",
            self.temp_prefix,
            label,
            Utc::now().timestamp()
        );
        let bytes = tokio::fs::read(audio).await?;
        self.objects.put(&key, bytes, "audio/wav").await?;

        let outcome = self.run_job(&key, label).await;

        // The temp upload is removed once the job is terminal, regardless of
        // whether the caller later fails.
        if let Err(err) = self.objects.delete(&key).await {
            warn!(key = %key, error = %err, "failed to delete transient audio upload");
        }
        outcome
    }

    async fn run_job(&self, key: &str, label: &str) -> Result<String, SpeechError> {
        let media_uri = self.objects.signed_url(key, chrono::Duration::hours(1)).await?;
        let name = format!("transcribe-{}-{}", label, Uuid::new_v4());
        self.speech
            .start_job(&StartJobRequest {
                name: name.clone(),
                media_uri,
                media_format: "wav".to_string(),
                language_code: self.config.language.clone(),
            })
            .await?;

        for _ in 0..self.config.poll_max_attempts {
            sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
            let job = self.speech.get_job(&name).await?;
            match job.status {
                SpeechJobStatus::Completed => {
                    let uri = job.result_uri.ok_or_else(|| {
                        SpeechError::Malformed("completed job without result uri".into())
                    })?;
                    let body = self.speech.fetch_result(&uri).await?;
                    return parse_transcript(&body);
                }
                SpeechJobStatus::Failed => {
                    return Err(SpeechError::JobFailed(
                        job.failure_reason
                            .unwrap_or_else(|| "transcription job failed".to_string()),
                    ));
                }
                SpeechJobStatus::Queued | SpeechJobStatus::InProgress => {}
            }
        }
        Err(SpeechError::Timeout {
            attempts: self.config.poll_max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;
    use crate::store::FsObjectStore;

    struct FakeSpeech {
        statuses: Mutex<Vec<SpeechJobStatus>>,
        result_body: String,
    }

    impl FakeSpeech {
        fn new(statuses: Vec<SpeechJobStatus>, result_body: &str) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                result_body: result_body.to_string(),
            }
        }
    }

    #[async_trait]
    impl SpeechToText for FakeSpeech {
        async fn start_job(&self, _request: &StartJobRequest) -> Result<(), SpeechError> {
            Ok(())
        }

        async fn get_job(&self, name: &str) -> Result<SpeechJob, SpeechError> {
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.is_empty() {
                SpeechJobStatus::InProgress
            } else {
                statuses.remove(0)
            };
            Ok(SpeechJob {
                name: name.to_string(),
                status,
                result_uri: (status == SpeechJobStatus::Completed)
                    .then(|| "result://transcript".to_string()),
                failure_reason: (status == SpeechJobStatus::Failed)
                    .then(|| "media unreadable".to_string()),
            })
        }

        async fn fetch_result(&self, _uri: &str) -> Result<String, SpeechError> {
            Ok(self.result_body.clone())
        }
    }

    fn section(max_attempts: u32) -> TranscriptionSection {
        TranscriptionSection {
            language: "en-US".to_string(),
            poll_interval_seconds: 0,
            poll_max_attempts: max_attempts,
        }
    }

    fn audio_fixture(base: &TempDir) -> std::path::PathBuf {
        let path = base.path().join("audio16k.wav");
        std::fs::write(&path, b"RIFFfake").unwrap();
        path
    }

    #[tokio::test]
    async fn completed_job_yields_first_alternative_and_cleans_up() {
        let base = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::new(base.path().join("objects"), "secret"));
        let speech = Arc::new(FakeSpeech::new(
            vec![
                SpeechJobStatus::Queued,
                SpeechJobStatus::InProgress,
                SpeechJobStatus::Completed,
            ],
            r#"{"results":{"transcripts":[{"transcript":"hello world"},{"transcript":"alt"}]}}"#,
        ));
        let client = TranscriptionClient::new(
            objects.clone(),
            speech,
            section(10),
            "temp/transcribe",
        );

        let audio = audio_fixture(&base);
        let transcript = client.transcribe(&audio, "clip").await.unwrap();
        assert_eq!(transcript, "hello world");

        // The transient upload is gone.
        let leftovers: Vec<_> = walkdir::WalkDir::new(base.path().join("objects"))
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .collect();
        assert!(leftovers.is_empty(), "temp upload not deleted: {leftovers:?}");
    }

    #[tokio::test]
    async fn failed_job_raises_with_reason() {
        let base = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::new(base.path().join("objects"), "secret"));
        let speech = Arc::new(FakeSpeech::new(vec![SpeechJobStatus::Failed], "{}"));
        let client =
            TranscriptionClient::new(objects, speech, section(10), "temp/transcribe");

        let audio = audio_fixture(&base);
        match client.transcribe(&audio, "clip").await {
            Err(SpeechError::JobFailed(reason)) => assert_eq!(reason, "media unreadable"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn polling_is_bounded() {
        let base = TempDir::new().unwrap();
        let objects = Arc::new(FsObjectStore::new(base.path().join("objects"), "secret"));
        let speech = Arc::new(FakeSpeech::new(Vec::new(), "{}"));
        let client = TranscriptionClient::new(objects, speech, section(4), "temp/transcribe");

        let audio = audio_fixture(&base);
        match client.transcribe(&audio, "clip").await {
            Err(SpeechError::Timeout { attempts }) => assert_eq!(attempts, 4),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn transcript_parse_rejects_empty_alternatives() {
        assert!(matches!(
            parse_transcript(r#"{"results":{"transcripts":[]}}"#),
            Err(SpeechError::Malformed(_))
        ));
    }
}
