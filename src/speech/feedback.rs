use tracing::{debug, warn};

use super::{SynthesisEvent, SynthesisPort};

/// Cancel-then-speak front end for the synthesis engine. Never fails.
pub struct SpeechFeedback {
    port: Box<dyn SynthesisPort>,
    next_utterance: u64,
    current: Option<u64>,
}

impl SpeechFeedback {
    pub fn new(port: Box<dyn SynthesisPort>) -> Self {
        Self {
            port,
            next_utterance: 0,
            current: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Speak `text`, cutting off the current utterance. Blank text is ignored.
    pub fn speak(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        self.port.cancel();
        self.next_utterance += 1;
        let utterance = self.next_utterance;

        match self.port.speak(utterance, text) {
            Ok(()) => {
                debug!(utterance, text, "speaking");
                self.current = Some(utterance);
            }
            Err(e) => {
                warn!(error = %e, "speech synthesis failed");
                self.current = None;
            }
        }
    }

    pub fn cancel(&mut self) {
        self.port.cancel();
        self.current = None;
    }

    /// Process an engine callback; events for superseded utterances are
    /// dropped
    pub fn handle(&mut self, event: SynthesisEvent) {
        if self.current != Some(event.utterance()) {
            return;
        }
        match event {
            SynthesisEvent::Started { .. } => {}
            SynthesisEvent::Finished { utterance } => {
                debug!(utterance, "utterance finished");
                self.current = None;
            }
            SynthesisEvent::Failed { utterance, message } => {
                warn!(utterance, %message, "utterance failed");
                self.current = None;
            }
        }
    }
}
