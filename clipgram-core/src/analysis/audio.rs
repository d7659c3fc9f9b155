use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use super::error::{AnalysisError, AnalysisResult};
use crate::config::AnalysisSection;

/// Produces a 16kHz mono 16-bit PCM track for transcription. A silent or
/// audio-less source is the common case, so "no track" is a boolean result,
/// not an error.
pub struct AudioExtractor {
    config: AnalysisSection,
}

impl AudioExtractor {
    pub fn new(config: AnalysisSection) -> Self {
        Self { config }
    }

    pub async fn extract(&self, video: &Path, out: &Path) -> AnalysisResult<bool> {
        let output = Command::new(&self.config.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .args(["-vn", "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
            .arg(out)
            .output()
            .await
            .map_err(|source| AnalysisError::Io {
                source,
                path: PathBuf::from(&self.config.ffmpeg),
            })?;

        if !output.status.success() {
            info!(video = %video.display(), "no extractable audio track");
            return Ok(false);
        }
        Ok(tokio::fs::metadata(out).await.is_ok())
    }
}
