use std::path::PathBuf;

use crate::records::SourceCategory;

const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "opus", "ogg", "aac", "flac", "wav"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Audio,
    Video,
}

impl ArtifactKind {
    pub fn from_extension(extension: Option<&str>) -> Self {
        match extension {
            Some(ext) if AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)) => {
                ArtifactKind::Audio
            }
            _ => ArtifactKind::Video,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio/mp4",
            ArtifactKind::Video => "video/mp4",
        }
    }
}

/// The downloaded file. Owned by the producing job until handed to the
/// upload and delivery steps; the working directory containing it is deleted
/// when the job ends, success or not.
#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
}

impl DownloadedArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn size_mb(&self) -> f64 {
        let mb = self.size_bytes as f64 / (1024.0 * 1024.0);
        (mb * 10.0).round() / 10.0
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub category: SourceCategory,
    pub url: String,
    /// Cookie-file contents, when a credential was available.
    pub cookies: Option<String>,
    pub proxy: Option<String>,
}
