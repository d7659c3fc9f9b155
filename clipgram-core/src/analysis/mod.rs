mod audio;
mod error;
mod frames;
mod inference;
mod report;
mod transcribe;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::warn;

pub use audio::AudioExtractor;
pub use error::{AnalysisError, AnalysisResult};
pub use frames::{thin_frames, FrameSampler};
pub use inference::{
    ChatMessage, ChatRequest, ContentBlock, HttpInferenceClient, ImageUrlBlock, InferenceClient,
    InferenceError,
};
pub use report::{StrategySynthesizer, VisualAnalyzer};
pub use transcribe::{
    HttpSpeechToText, SpeechError, SpeechJob, SpeechJobStatus, SpeechToText, StartJobRequest,
    TranscriptionClient,
};

/// Substituted for the transcript when the source has no audio track or
/// transcription fails. Synthesis receives it verbatim.
pub const NO_AUDIO_TRANSCRIPT: &str = "[No audio detected]";

pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Ephemeral per-run result; nothing here is persisted or cached.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub visual_narrative: String,
    pub transcript: String,
    pub report: String,
}

/// Media duration in seconds, via the probe tool.
pub async fn probe_duration(ffprobe: &str, media: &Path) -> AnalysisResult<f64> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
        .arg(media)
        .output()
        .await
        .map_err(|source| AnalysisError::Io {
            source,
            path: PathBuf::from(ffprobe),
        })?;
    if !output.status.success() {
        return Err(AnalysisError::Probe(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse()
        .map_err(|_| AnalysisError::Probe(format!("unparseable duration: {}", text.trim())))
}

/// Runs the visual and audio tracks concurrently, then synthesis. The audio
/// track degrades to [`NO_AUDIO_TRANSCRIPT`] instead of propagating; a
/// failure on the visual track fails the whole analysis.
pub struct AnalysisOrchestrator {
    sampler: FrameSampler,
    extractor: AudioExtractor,
    transcription: TranscriptionClient,
    visual: VisualAnalyzer,
    synthesizer: StrategySynthesizer,
}

impl AnalysisOrchestrator {
    pub fn new(
        sampler: FrameSampler,
        extractor: AudioExtractor,
        transcription: TranscriptionClient,
        visual: VisualAnalyzer,
        synthesizer: StrategySynthesizer,
    ) -> Self {
        Self {
            sampler,
            extractor,
            transcription,
            visual,
            synthesizer,
        }
    }

    pub async fn analyze(
        &self,
        video: &Path,
        duration_seconds: f64,
        title: &str,
        label: &str,
        progress: Option<ProgressFn>,
    ) -> AnalysisResult<AnalysisReport> {
        let parent = video.parent().unwrap_or_else(|| Path::new("."));
        let frames_dir = parent.join(format!("frames_{label}"));
        let wav_path = parent.join("audio16k.wav");

        let visual_track = async {
            note(&progress, "sampling frames");
            let frames = self.sampler.sample(video, duration_seconds, &frames_dir).await?;
            note(&progress, "analyzing visuals");
            self.visual.analyze(&frames).await
        };

        let audio_track = async {
            note(&progress, "extracting audio");
            match self.extractor.extract(video, &wav_path).await {
                Ok(true) => {
                    note(&progress, "transcribing audio");
                    match self.transcription.transcribe(&wav_path, label).await {
                        Ok(transcript) => transcript,
                        Err(err) => {
                            warn!(label = label, error = %err, "transcription degraded to sentinel");
                            NO_AUDIO_TRANSCRIPT.to_string()
                        }
                    }
                }
                Ok(false) => NO_AUDIO_TRANSCRIPT.to_string(),
                Err(err) => {
                    warn!(label = label, error = %err, "audio extraction degraded to sentinel");
                    NO_AUDIO_TRANSCRIPT.to_string()
                }
            }
        };

        let (visual_result, transcript) = tokio::join!(visual_track, audio_track);

        // Frame extraction workspace is removed whatever happened above.
        if let Err(err) = tokio::fs::remove_dir_all(&frames_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %frames_dir.display(), error = %err, "failed to clean frames directory");
            }
        }

        let visual_narrative = visual_result?;
        note(&progress, "synthesizing report");
        let report = self
            .synthesizer
            .synthesize(&visual_narrative, &transcript, duration_seconds, title)
            .await?;

        Ok(AnalysisReport {
            visual_narrative,
            transcript,
            report,
        })
    }
}

fn note(progress: &Option<ProgressFn>, stage: &str) {
    if let Some(callback) = progress {
        callback(stage);
    }
}
