//! Voice controller state machine
//!
//! A single [`Controller`] owns every piece of activation state and reacts
//! to one input at a time:
//! - recognizer engine callbacks
//! - synthesis progress
//! - host control requests
//! - its own timers and backend completions
//!
//! Overall flow: `Idle -> Activated -> SessionActive -> Idle`, with
//! `Activated -> Idle` on failed authentication or a lapsed wake window.

mod hooks;
mod machine;
mod timers;

#[cfg(test)]
mod testing;

use serde::{Deserialize, Serialize};

use crate::auth::AuthState;
use crate::backend::{AuthResult, BackendError, CommandReply};
use crate::config::{ConfigPatch, Configuration};
use crate::recognition::{EngineEvent, ListeningState, RecognitionError};
use crate::speech::SynthesisEvent;

pub use hooks::{EventHooks, HostHooks};
pub use machine::{Controller, ControllerInputs, ControllerOptions};
pub use timers::TimerKind;

/// Wake-word activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// Passive listening for the wake phrase
    #[default]
    Idle,
    /// Wake phrase heard; transcripts go to authentication and dispatch
    Activated,
    /// Wake window lapsed; cleared back to Idle in the same step
    Expired,
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::Idle => write!(f, "Idle"),
            ActivationState::Activated => write!(f, "Activated"),
            ActivationState::Expired => write!(f, "Expired"),
        }
    }
}

/// Snapshot of everything a host UI displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub listening: ListeningState,
    pub activation: ActivationState,
    pub auth: AuthState,
    pub session_active: bool,
    /// Time left before the open session idles out
    pub session_remaining_ms: Option<u64>,
    pub speaking: bool,
    /// Latest transcript of the current activation
    pub transcript: String,
    pub last_reply: Option<String>,
    pub config: Configuration,
    /// Failure that halted listening, until the user restarts it
    pub listening_error: Option<RecognitionError>,
}

impl ControllerStatus {
    /// Equal apart from the ticking session countdown
    pub fn same_state(&self, other: &ControllerStatus) -> bool {
        ControllerStatus {
            session_remaining_ms: None,
            ..self.clone()
        } == ControllerStatus {
            session_remaining_ms: None,
            ..other.clone()
        }
    }
}

/// Requests from the host application
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    SetConfig(ConfigPatch),
    Logout,
    /// Start a recognizer run even with always-listening off
    StartListening,
    StopListening,
    /// Typed command, handled like a final transcript
    Command(String),
}

/// Anything the controller reacts to from outside
#[derive(Debug)]
pub enum ControllerInput {
    Engine(EngineEvent),
    Synthesis(SynthesisEvent),
    Control(ControlRequest),
}

/// Completions the controller posts to itself
#[derive(Debug)]
pub(crate) enum Internal {
    TimerFired { kind: TimerKind, token: u64 },
    AuthCompleted {
        attempt: u64,
        result: Result<AuthResult, BackendError>,
    },
    CommandCompleted {
        id: u64,
        result: Result<CommandReply, BackendError>,
    },
}
