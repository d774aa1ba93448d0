//! Recognition engine backed by an external streaming recognizer process
//!
//! The child writes one result per stdout line:
//! - `{"text": "...", "is_final": true, "audio_path": "/tmp/utt.wav"}`
//! - `{"error": "not-allowed", "message": "..."}`
//! - anything else non-empty is taken as a final transcript.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{EngineEvent, EngineEventKind, RecognitionError, RecognitionPort, TranscriptEvent};

pub struct ProcessRecognizer {
    program: String,
    args: Vec<String>,
    events: mpsc::Sender<EngineEvent>,
    task: Option<JoinHandle<()>>,
}

impl ProcessRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            program: program.into(),
            args,
            events,
            task: None,
        }
    }
}

impl RecognitionPort for ProcessRecognizer {
    fn start(&mut self, generation: u64) -> Result<(), RecognitionError> {
        self.stop();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.program, e))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            RecognitionError::Unavailable(format!("{} stdout not captured", self.program))
        })?;

        info!(program = %self.program, generation, "recognizer spawned");
        self.task = Some(tokio::spawn(pump(child, stdout, generation, self.events.clone())));
        Ok(())
    }

    fn stop(&mut self) {
        // Aborting drops the child, which kills it
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProcessRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> RecognitionError {
    match e.kind() {
        std::io::ErrorKind::NotFound => RecognitionError::Unavailable(format!("{program} not found")),
        std::io::ErrorKind::PermissionDenied => {
            RecognitionError::PermissionDenied(format!("{program}: {e}"))
        }
        _ => RecognitionError::Transient(format!("{program}: {e}")),
    }
}

async fn pump(mut child: Child, stdout: ChildStdout, generation: u64, events: mpsc::Sender<EngineEvent>) {
    let send = |kind: EngineEventKind| {
        let events = events.clone();
        async move { events.send(EngineEvent { generation, kind }).await.is_ok() }
    };

    if !send(EngineEventKind::Started).await {
        return;
    }

    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(kind) = parse_line(&line) {
                    if !send(kind).await {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                send(EngineEventKind::Error(RecognitionError::Transient(e.to_string()))).await;
                return;
            }
        }
    }

    let kind = match child.wait().await {
        Ok(status) if status.success() => EngineEventKind::Ended,
        Ok(status) => EngineEventKind::Error(RecognitionError::Transient(format!(
            "recognizer exited with {status}"
        ))),
        Err(e) => EngineEventKind::Error(RecognitionError::Transient(e.to_string())),
    };
    debug!(generation, ?kind, "recognizer finished");
    send(kind).await;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Line {
    Error {
        error: String,
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        text: String,
        #[serde(default = "default_final")]
        is_final: bool,
        #[serde(default)]
        audio_path: Option<PathBuf>,
    },
}

fn default_final() -> bool {
    true
}

fn parse_line(line: &str) -> Option<EngineEventKind> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<Line>(line) {
        Ok(Line::Error { error, message }) => Some(EngineEventKind::Error(
            RecognitionError::from_engine_code(&error, message.as_deref()),
        )),
        Ok(Line::Result {
            text,
            is_final,
            audio_path,
        }) => Some(EngineEventKind::Transcript(TranscriptEvent {
            audio_path,
            ..TranscriptEvent::new(text, is_final)
        })),
        Err(_) => Some(EngineEventKind::Transcript(TranscriptEvent::new(line, true))),
    }
}
