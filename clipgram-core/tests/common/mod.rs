#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use clipgram_core::analysis::{
    AnalysisOrchestrator, AudioExtractor, ChatRequest, FrameSampler, InferenceClient,
    InferenceError, SpeechError, SpeechJob, SpeechToText, StartJobRequest, StrategySynthesizer,
    TranscriptionClient, VisualAnalyzer,
};
use clipgram_core::chat::{ChatError, ChatResult, ChatTransport, MessageRef};
use clipgram_core::config::{
    AnalysisSection, ClipgramConfig, DeliverySection, DownloadSection, InferenceSection,
    PathsSection, StorageSection, TranscriptionSection,
};
use clipgram_core::fetcher::MediaFetcher;
use clipgram_core::pipeline::DownloadOrchestrator;
use clipgram_core::store::{FileSecrets, FsObjectStore, SqliteRecordStore};

/// Chat transport double that records every outbound call.
#[derive(Default)]
pub struct RecordingChat {
    pub messages: Mutex<Vec<(String, String)>>,
    pub edits: Mutex<Vec<(String, i64, String)>>,
    pub media: Mutex<Vec<(String, PathBuf, String)>>,
    next_id: AtomicI64,
    pub reject_media: bool,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_media() -> Self {
        Self {
            reject_media: true,
            ..Self::default()
        }
    }

    pub fn message_texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send_message(&self, chat_id: &str, text: &str) -> ChatResult<MessageRef> {
        self.messages
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(MessageRef(self.next_id.fetch_add(1, Ordering::SeqCst) + 100))
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message: MessageRef,
        text: &str,
    ) -> ChatResult<()> {
        self.edits
            .lock()
            .unwrap()
            .push((chat_id.to_string(), message.0, text.to_string()));
        Ok(())
    }

    async fn send_media(&self, chat_id: &str, file: &Path, caption: &str) -> ChatResult<()> {
        if self.reject_media {
            return Err(ChatError::TooLarge);
        }
        self.media.lock().unwrap().push((
            chat_id.to_string(),
            file.to_path_buf(),
            caption.to_string(),
        ));
        Ok(())
    }
}

/// Inference double with canned responses and full request capture.
#[derive(Default)]
pub struct StaticInference {
    pub responses: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl StaticInference {
    pub fn with_responses(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InferenceClient for StaticInference {
    async fn complete(&self, request: ChatRequest) -> Result<String, InferenceError> {
        self.requests.lock().unwrap().push(request);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "canned response".to_string()))
    }
}

/// Speech double that never reaches a terminal state; download-path tests
/// never exercise it.
pub struct PendingSpeech;

#[async_trait]
impl SpeechToText for PendingSpeech {
    async fn start_job(&self, _request: &StartJobRequest) -> Result<(), SpeechError> {
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<SpeechJob, SpeechError> {
        Err(SpeechError::JobFailed(format!("{name}: not implemented")))
    }

    async fn fetch_result(&self, _uri: &str) -> Result<String, SpeechError> {
        Err(SpeechError::Malformed("not implemented".into()))
    }
}

pub fn test_config(base: &Path, tool: &Path, ffmpeg: &Path, ffprobe: &Path) -> ClipgramConfig {
    ClipgramConfig {
        paths: PathsSection {
            base_dir: base.display().to_string(),
            work_dir: base.join("work").display().to_string(),
            data_dir: base.join("data").display().to_string(),
            logs_dir: base.join("logs").display().to_string(),
        },
        download: DownloadSection {
            tool: tool.display().to_string(),
            timeout_seconds: 30,
            throttle_seconds: 0,
            path_env: "/usr/bin:/bin".to_string(),
            proxy: None,
            cookie_secret_id: None,
        },
        analysis: AnalysisSection {
            ffmpeg: ffmpeg.display().to_string(),
            ffprobe: ffprobe.display().to_string(),
            frame_width: 640,
            max_frames: 35,
            hook_seconds: 3.0,
            hook_fps: 2,
            body_fps: 1,
        },
        transcription: TranscriptionSection {
            language: "en-US".to_string(),
            poll_interval_seconds: 0,
            poll_max_attempts: 3,
        },
        inference: InferenceSection {
            endpoint: "http://127.0.0.1:0/unused".to_string(),
            vision_model: "vision-test".to_string(),
            synthesis_model: "strategist-test".to_string(),
            max_tokens: 1024,
            api_key_secret_id: None,
        },
        delivery: DeliverySection {
            message_limit: 4096,
            chunk_limit: 3900,
            chunk_delay_ms: 0,
            max_direct_mb: 50,
        },
        storage: StorageSection {
            download_prefix: "downloads".to_string(),
            temp_prefix: "temp/transcribe".to_string(),
            retention_days: 14,
            signed_url_ttl_hours: 168,
        },
    }
}

pub struct Harness {
    pub orchestrator: DownloadOrchestrator,
    pub records: Arc<SqliteRecordStore>,
    pub objects: Arc<FsObjectStore>,
    pub chat: Arc<RecordingChat>,
    pub inference: Arc<StaticInference>,
    pub config: Arc<ClipgramConfig>,
}

pub fn build_harness(
    base: &Path,
    config: ClipgramConfig,
    chat: Arc<RecordingChat>,
    inference: Arc<StaticInference>,
) -> Harness {
    std::fs::create_dir_all(base.join("work")).unwrap();
    std::fs::create_dir_all(base.join("data")).unwrap();

    let records = Arc::new(
        SqliteRecordStore::builder()
            .path(base.join("data/records.sqlite"))
            .build()
            .unwrap(),
    );
    records.initialize().unwrap();
    let objects = Arc::new(FsObjectStore::new(base.join("objects"), "test-secret"));
    let secrets = Arc::new(FileSecrets::new(base.join("secrets")));
    let config = Arc::new(config);

    let fetcher = MediaFetcher::new(config.download.clone(), base.join("work"));
    let sampler = FrameSampler::new(config.analysis.clone());
    let extractor = AudioExtractor::new(config.analysis.clone());
    let transcription = TranscriptionClient::new(
        objects.clone(),
        Arc::new(PendingSpeech),
        config.transcription.clone(),
        config.storage.temp_prefix.clone(),
    );
    let visual = VisualAnalyzer::new(
        inference.clone(),
        config.inference.vision_model.clone(),
        config.inference.max_tokens,
    );
    let synthesizer = StrategySynthesizer::new(
        inference.clone(),
        config.inference.synthesis_model.clone(),
        config.inference.max_tokens,
    );
    let analysis =
        AnalysisOrchestrator::new(sampler, extractor, transcription, visual, synthesizer);

    let orchestrator = DownloadOrchestrator::new(
        fetcher,
        analysis,
        records.clone(),
        objects.clone(),
        secrets,
        chat.clone(),
        config.clone(),
    );

    Harness {
        orchestrator,
        records,
        objects,
        chat,
        inference,
        config,
    }
}

pub fn write_script(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
