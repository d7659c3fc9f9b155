use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::inference::InferenceError;
use super::transcribe::SpeechError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{stage} failed with status {status:?}: {stderr}")]
    Ffmpeg {
        stage: &'static str,
        status: Option<i32>,
        stderr: String,
    },
    #[error("could not probe media duration: {0}")]
    Probe(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Transcription(#[from] SpeechError),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
