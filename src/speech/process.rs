//! Synthesis through a command-line TTS engine such as espeak-ng

use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{SynthesisError, SynthesisEvent, SynthesisPort};

pub struct ProcessSynthesizer {
    program: String,
    args: Vec<String>,
    events: mpsc::Sender<SynthesisEvent>,
    task: Option<JoinHandle<()>>,
}

impl ProcessSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, events: mpsc::Sender<SynthesisEvent>) -> Self {
        Self {
            program: program.into(),
            args,
            events,
            task: None,
        }
    }
}

impl SynthesisPort for ProcessSynthesizer {
    fn speak(&mut self, utterance: u64, text: &str) -> Result<(), SynthesisError> {
        self.cancel();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SynthesisError::Unavailable(format!("{} not found", self.program))
                }
                _ => SynthesisError::Failed(format!("{}: {e}", self.program)),
            })?;

        let events = self.events.clone();
        self.task = Some(tokio::spawn(async move {
            let _ = events.send(SynthesisEvent::Started { utterance }).await;
            let event = match child.wait().await {
                Ok(status) if status.success() => SynthesisEvent::Finished { utterance },
                Ok(status) => SynthesisEvent::Failed {
                    utterance,
                    message: format!("synthesizer exited with {status}"),
                },
                Err(e) => SynthesisEvent::Failed {
                    utterance,
                    message: e.to_string(),
                },
            };
            debug!(utterance, ?event, "synthesizer finished");
            let _ = events.send(event).await;
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProcessSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}
