use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClipgramConfig {
    pub paths: PathsSection,
    pub download: DownloadSection,
    pub analysis: AnalysisSection,
    pub transcription: TranscriptionSection,
    pub inference: InferenceSection,
    pub delivery: DeliverySection,
    pub storage: StorageSection,
}

impl ClipgramConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    /// Invariants the rest of the system assumes; checked once at load.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.download.timeout_seconds == 0 {
            return Err("download.timeout_seconds must be greater than zero".into());
        }
        if self.delivery.chunk_limit >= self.delivery.message_limit {
            return Err(
                "delivery.chunk_limit must leave headroom under delivery.message_limit".into(),
            );
        }
        if self.analysis.max_frames == 0 {
            return Err("analysis.max_frames must be greater than zero".into());
        }
        if self.transcription.poll_max_attempts == 0 {
            return Err("transcription.poll_max_attempts must be greater than zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub data_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    /// Downloader binary, e.g. "yt-dlp".
    pub tool: String,
    pub timeout_seconds: u64,
    pub throttle_seconds: u64,
    /// Minimal PATH handed to the child process.
    pub path_env: String,
    pub proxy: Option<String>,
    /// Secret id holding cookie material; absence means anonymous download.
    pub cookie_secret_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub frame_width: u32,
    pub max_frames: usize,
    pub hook_seconds: f64,
    pub hook_fps: u32,
    pub body_fps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSection {
    pub language: String,
    pub poll_interval_seconds: u64,
    pub poll_max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceSection {
    pub endpoint: String,
    pub vision_model: String,
    pub synthesis_model: String,
    pub max_tokens: u32,
    pub api_key_secret_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySection {
    pub message_limit: usize,
    pub chunk_limit: usize,
    pub chunk_delay_ms: u64,
    pub max_direct_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub download_prefix: String,
    pub temp_prefix: String,
    pub retention_days: i64,
    pub signed_url_ttl_hours: i64,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClipgramConfig> {
    let path = path.as_ref();
    let config: ClipgramConfig = load_toml(path)?;
    config.validate().map_err(|detail| ConfigError::Invalid {
        path: path.to_path_buf(),
        detail,
    })?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/clipgram.toml");
        let config = load_config(path).expect("config should parse");
        assert_eq!(config.download.tool, "yt-dlp");
        assert_eq!(config.download.timeout_seconds, 840);
        assert_eq!(config.delivery.message_limit, 4096);
        assert!(config.analysis.max_frames >= 1);
    }

    #[test]
    fn chunk_limit_must_leave_headroom() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/clipgram.toml");
        let mut config = load_config(path).unwrap();
        config.delivery.chunk_limit = config.delivery.message_limit;
        assert!(config.validate().is_err());
    }
}
