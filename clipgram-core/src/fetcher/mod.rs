mod error;
mod progress;
mod types;

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::timeout;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DownloadSection;

pub use error::{FetchError, FetchResult};
pub use progress::{LineEvent, Phase, ProgressThrottle, ProgressTracker, ProgressUpdate};
pub use types::{ArtifactKind, DownloadedArtifact, FetchRequest};

const STDERR_TAIL_LINES: usize = 200;
const FORMAT_UNAVAILABLE: &str = "requested format not available";
const TEMP_EXTENSIONS: &[&str] = &["part", "ytdl", "tmp"];
const COOKIE_FILE: &str = "cookies.txt";

/// Receives throttled progress ticks. Implementations are best-effort by
/// contract: they log their own failures and never surface them.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn notify(&self, update: &ProgressUpdate);
}

/// Spawns and supervises the external download tool inside a fresh,
/// exclusively-owned working directory.
pub struct MediaFetcher {
    config: DownloadSection,
    work_root: PathBuf,
}

impl MediaFetcher {
    pub fn new(config: DownloadSection, work_root: impl AsRef<Path>) -> Self {
        Self {
            config,
            work_root: work_root.as_ref().to_path_buf(),
        }
    }

    /// The working directory owned by a job id. Exposed so the orchestrator
    /// can guarantee cleanup regardless of which stage failed.
    pub fn workdir_for(&self, job_id: &str) -> PathBuf {
        self.work_root.join(job_id)
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        job_id: &str,
        observer: &dyn ProgressObserver,
    ) -> FetchResult<DownloadedArtifact> {
        let workdir = self.workdir_for(job_id);
        if workdir.exists() {
            tokio::fs::remove_dir_all(&workdir)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: workdir.clone(),
                })?;
        }
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: workdir.clone(),
            })?;

        if let Some(cookies) = &request.cookies {
            let cookie_path = workdir.join(COOKIE_FILE);
            tokio::fs::write(&cookie_path, cookies)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: cookie_path,
                })?;
        }

        let args = self.build_args(request);
        let mut child = match Command::new(&self.config.tool)
            .args(&args)
            .current_dir(&workdir)
            .env_clear()
            .env("PATH", &self.config.path_env)
            .env("HOME", &workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.cleanup(&workdir).await;
                return Err(FetchError::Spawn {
                    source,
                    tool: self.config.tool.clone(),
                });
            }
        };

        let stdout = child.stdout.take().ok_or_else(|| FetchError::Spawn {
            source: io::Error::new(io::ErrorKind::Other, "stdout not captured"),
            tool: self.config.tool.clone(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| FetchError::Spawn {
            source: io::Error::new(io::ErrorKind::Other, "stderr not captured"),
            tool: self.config.tool.clone(),
        })?;

        let mut tracker = ProgressTracker::new(Duration::from_secs(self.config.throttle_seconds));
        let mut stderr_tail = VecDeque::new();
        let deadline = Duration::from_secs(self.config.timeout_seconds);

        let waited = timeout(
            deadline,
            drive_child(
                &mut child,
                stdout,
                stderr,
                &mut tracker,
                observer,
                &mut stderr_tail,
            ),
        )
        .await;

        let status = match waited {
            Err(_elapsed) => {
                // Fatal to the job, not retried.
                if let Err(err) = child.kill().await {
                    warn!(job = job_id, error = %err, "failed to kill timed-out downloader");
                }
                self.cleanup(&workdir).await;
                return Err(FetchError::Timeout {
                    seconds: self.config.timeout_seconds,
                });
            }
            Ok(Err(source)) => {
                self.cleanup(&workdir).await;
                return Err(FetchError::Io {
                    source,
                    path: workdir,
                });
            }
            Ok(Ok(status)) => status,
        };

        if !status.success() {
            let stderr_text = stderr_tail.make_contiguous().join("\n");
            if stderr_text.contains(FORMAT_UNAVAILABLE) {
                warn!(
                    job = job_id,
                    url = %request.url,
                    "requested format not available from source"
                );
            }
            self.cleanup(&workdir).await;
            return Err(FetchError::Tool {
                status: status.code(),
                stderr: stderr_text,
            });
        }

        discover_artifact(&workdir).await
    }

    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "%(title).120s.%(ext)s".to_string(),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--progress-template".to_string(),
            "download:dl|downloading|%(progress._percent_str)s|%(progress._speed_str)s"
                .to_string(),
            "--progress-template".to_string(),
            "postprocess:dl|postprocess|100%|-".to_string(),
        ];
        if request.category.audio_only() {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                "m4a".to_string(),
                "--audio-quality".to_string(),
                "0".to_string(),
            ]);
        } else {
            args.extend([
                "-f".to_string(),
                "bv*+ba/b".to_string(),
                "--merge-output-format".to_string(),
                "mp4".to_string(),
            ]);
        }
        if let Some(proxy) = &request.proxy {
            args.extend(["--proxy".to_string(), proxy.clone()]);
        }
        if request.cookies.is_some() {
            args.extend(["--cookies".to_string(), COOKIE_FILE.to_string()]);
        }
        args.push(request.url.clone());
        args
    }

    async fn cleanup(&self, workdir: &Path) {
        if let Err(err) = tokio::fs::remove_dir_all(workdir).await {
            warn!(path = %workdir.display(), error = %err, "failed to remove working directory");
        }
    }
}

/// Scans stdout and stderr identically — either stream may carry progress
/// depending on the tool version — then reaps the child.
async fn drive_child(
    child: &mut Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tracker: &mut ProgressTracker,
    observer: &dyn ProgressObserver,
    stderr_tail: &mut VecDeque<String>,
) -> io::Result<std::process::ExitStatus> {
    let stdout_lines = LinesStream::new(BufReader::new(stdout).lines()).map(|line| (false, line));
    let stderr_lines = LinesStream::new(BufReader::new(stderr).lines()).map(|line| (true, line));
    let mut merged = stdout_lines.merge(stderr_lines);

    while let Some((from_stderr, line)) = merged.next().await {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if from_stderr {
            if stderr_tail.len() == STDERR_TAIL_LINES {
                stderr_tail.pop_front();
            }
            stderr_tail.push_back(line.clone());
        }
        if let Some(update) = tracker.observe(&line) {
            observer.notify(&update).await;
        }
    }

    child.wait().await
}

/// Exactly one non-partial, non-temporary file must remain; zero or many is
/// an ambiguous result and fatal to the job.
async fn discover_artifact(workdir: &Path) -> FetchResult<DownloadedArtifact> {
    let mut candidates = Vec::new();
    for entry in WalkDir::new(workdir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| FetchError::Io {
            source: io::Error::from(err),
            path: workdir.to_path_buf(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy() == COOKIE_FILE {
            continue;
        }
        let extension = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        if let Some(ext) = &extension {
            if TEMP_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
        }
        candidates.push(entry.into_path());
    }

    match candidates.len() {
        0 => Err(FetchError::MissingOutput),
        1 => {
            let path = candidates.remove(0);
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: path.clone(),
                })?;
            let kind = ArtifactKind::from_extension(
                path.extension().and_then(|ext| ext.to_str()),
            );
            Ok(DownloadedArtifact {
                path,
                size_bytes: metadata.len(),
                kind,
            })
        }
        count => Err(FetchError::AmbiguousOutput { count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_skips_partial_and_cookie_files() {
        let base = tempfile::TempDir::new().unwrap();
        std::fs::write(base.path().join("clip.mp4"), b"VIDEO").unwrap();
        std::fs::write(base.path().join("clip.mp4.part"), b"PARTIAL").unwrap();
        std::fs::write(base.path().join("clip.mp4.ytdl"), b"STATE").unwrap();
        std::fs::write(base.path().join("cookies.txt"), b"COOKIES").unwrap();

        let artifact = discover_artifact(base.path()).await.unwrap();
        assert_eq!(artifact.file_name(), "clip.mp4");
        assert_eq!(artifact.kind, ArtifactKind::Video);
        assert_eq!(artifact.size_bytes, 5);
    }

    #[tokio::test]
    async fn discover_rejects_empty_and_ambiguous_outputs() {
        let base = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            discover_artifact(base.path()).await,
            Err(FetchError::MissingOutput)
        ));

        std::fs::write(base.path().join("a.mp4"), b"A").unwrap();
        std::fs::write(base.path().join("b.mp4"), b"B").unwrap();
        assert!(matches!(
            discover_artifact(base.path()).await,
            Err(FetchError::AmbiguousOutput { count: 2 })
        ));
    }
}
