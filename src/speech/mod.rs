//! Spoken feedback
//!
//! [`SpeechFeedback`] owns the single synthesis channel. The engine sits
//! behind [`SynthesisPort`] and reports progress as [`SynthesisEvent`]s.

mod feedback;
mod phrases;
mod process;

use thiserror::Error;

pub use feedback::SpeechFeedback;
pub use phrases::{Phrase, Phrasebook};
pub use process::ProcessSynthesizer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("speech synthesizer unavailable: {0}")]
    Unavailable(String),

    #[error("speech synthesis failed: {0}")]
    Failed(String),
}

/// Progress of one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started { utterance: u64 },
    Finished { utterance: u64 },
    Failed { utterance: u64, message: String },
}

impl SynthesisEvent {
    pub fn utterance(&self) -> u64 {
        match self {
            SynthesisEvent::Started { utterance }
            | SynthesisEvent::Finished { utterance }
            | SynthesisEvent::Failed { utterance, .. } => *utterance,
        }
    }
}

/// Handle on a speech synthesis engine
pub trait SynthesisPort: Send {
    /// Begin speaking `text`. Completion arrives as a [`SynthesisEvent`].
    fn speak(&mut self, utterance: u64, text: &str) -> Result<(), SynthesisError>;

    /// Silence whatever is being spoken
    fn cancel(&mut self);
}
