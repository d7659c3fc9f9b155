use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::error::{AnalysisError, AnalysisResult};
use crate::config::AnalysisSection;

/// One planned extraction pass: a filename prefix plus the ffmpeg arguments
/// up to (but excluding) the output pattern.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FramePass {
    pub prefix: &'static str,
    pub args: Vec<String>,
}

/// Extracts a bounded, time-weighted set of stills from a video. Each call
/// re-extracts; there is no incremental resume.
pub struct FrameSampler {
    config: AnalysisSection,
}

impl FrameSampler {
    pub fn new(config: AnalysisSection) -> Self {
        Self { config }
    }

    /// The hook pass densely samples the opening seconds; the body pass
    /// covers the remainder at a lower rate and only exists for sources
    /// longer than the hook window. Prefixes are chosen so the combined
    /// listing sorts lexicographically into chronological order.
    pub(crate) fn plan_passes(&self, video: &Path, duration_seconds: f64) -> Vec<FramePass> {
        let hook_window = duration_seconds.min(self.config.hook_seconds);
        let scale = format!(
            "fps={},scale={}:-2",
            self.config.hook_fps, self.config.frame_width
        );
        let mut passes = vec![FramePass {
            prefix: "hook",
            args: vec![
                "-y".to_string(),
                "-i".to_string(),
                video.display().to_string(),
                "-t".to_string(),
                format!("{hook_window:.3}"),
                "-vf".to_string(),
                scale,
            ],
        }];
        if duration_seconds > self.config.hook_seconds {
            passes.push(FramePass {
                prefix: "tail",
                args: vec![
                    "-y".to_string(),
                    "-ss".to_string(),
                    format!("{:.3}", self.config.hook_seconds),
                    "-i".to_string(),
                    video.display().to_string(),
                    "-vf".to_string(),
                    format!(
                        "fps={},scale={}:-2",
                        self.config.body_fps, self.config.frame_width
                    ),
                ],
            });
        }
        passes
    }

    pub async fn sample(
        &self,
        video: &Path,
        duration_seconds: f64,
        out_dir: &Path,
    ) -> AnalysisResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|source| AnalysisError::Io {
                source,
                path: out_dir.to_path_buf(),
            })?;

        for pass in self.plan_passes(video, duration_seconds) {
            let pattern = out_dir.join(format!("{}_%03d.jpg", pass.prefix));
            let output = Command::new(&self.config.ffmpeg)
                .args(&pass.args)
                .arg(&pattern)
                .output()
                .await
                .map_err(|source| AnalysisError::Io {
                    source,
                    path: PathBuf::from(&self.config.ffmpeg),
                })?;
            if !output.status.success() {
                return Err(AnalysisError::Ffmpeg {
                    stage: "frame extraction",
                    status: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                });
            }
        }

        let mut frames = Vec::new();
        let mut entries =
            tokio::fs::read_dir(out_dir)
                .await
                .map_err(|source| AnalysisError::Io {
                    source,
                    path: out_dir.to_path_buf(),
                })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| AnalysisError::Io {
                source,
                path: out_dir.to_path_buf(),
            })?
        {
            let path = entry.path();
            if path.extension().map(|ext| ext == "jpg").unwrap_or(false) {
                frames.push(path);
            }
        }
        frames.sort();

        Ok(thin_frames(frames, self.config.max_frames))
    }
}

/// Deterministic thinning: below the cap this is a no-op; above it, every
/// Nth frame with N = floor(count / cap), truncated to exactly the cap.
pub fn thin_frames<T>(frames: Vec<T>, cap: usize) -> Vec<T> {
    if cap == 0 || frames.len() <= cap {
        return frames;
    }
    let step = frames.len() / cap;
    frames.into_iter().step_by(step.max(1)).take(cap).collect()
}
