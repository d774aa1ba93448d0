//! Continuous speech recognition
//!
//! The engine itself sits behind [`RecognitionPort`]; it reports back through
//! an [`EngineEvent`] channel. [`RecognitionManager`] owns the port and the
//! [`ListeningState`], and decides when a dead engine gets restarted.

mod lifecycle;
mod process;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use lifecycle::{LifecycleAction, ListeningState, RecognitionManager};
pub use process::ProcessRecognizer;

/// One partial or final speech-to-text result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Audio captured for this utterance, usable as voice evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            audio_path: None,
        }
    }
}

/// Recognition failures, split by whether retrying can help
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum RecognitionError {
    /// Microphone access refused; needs the user
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No engine or capture device to run
    #[error("speech recognition unavailable: {0}")]
    Unavailable(String),

    /// Runtime hiccup; the engine can simply be started again
    #[error("speech recognition error: {0}")]
    Transient(String),
}

impl RecognitionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecognitionError::Transient(_))
    }

    /// Classify a browser-style engine error code
    /// (`not-allowed`, `audio-capture`, `no-speech`, `network`, ...)
    pub fn from_engine_code(code: &str, detail: Option<&str>) -> Self {
        let message = match detail {
            Some(detail) if !detail.is_empty() => format!("{code}: {detail}"),
            _ => code.to_string(),
        };
        match code {
            "not-allowed" | "service-not-allowed" => RecognitionError::PermissionDenied(message),
            "audio-capture" => RecognitionError::Unavailable(message),
            _ => RecognitionError::Transient(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    Started,
    Transcript(TranscriptEvent),
    Error(RecognitionError),
    Ended,
}

/// Callback from the engine, tagged with the run that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub generation: u64,
    pub kind: EngineEventKind,
}

/// Handle on a speech recognition engine
///
/// `start` only launches the engine; results, errors and the end of the run
/// arrive asynchronously as [`EngineEvent`]s stamped with `generation`.
pub trait RecognitionPort: Send {
    fn start(&mut self, generation: u64) -> Result<(), RecognitionError>;
    fn stop(&mut self);
}
