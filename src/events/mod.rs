//! Events module for controller transitions
//!
//! Every observable change of the voice controller is published as a
//! [`StateEvent`] on a broadcast channel; the IPC server forwards them to
//! subscribed clients.

use serde::{Deserialize, Serialize};

use crate::backend::{AuthResult, CommandAction};
use crate::recognition::{ListeningState, RecognitionError};
use crate::session::EndReason;
use crate::state::ControllerStatus;

/// Events emitted by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Recognition engine changed state
    ListeningChanged { state: ListeningState },

    /// Listening halted until the user intervenes
    ListeningFailed { error: RecognitionError },

    /// Wake phrase heard while idle
    WakeWordDetected { phrase: String, transcript: String },

    /// Visual activation indicator on or off (only with visual feedback)
    VisualCue { active: bool },

    /// Wake window lapsed without a session
    ActivationExpired,

    /// Voice authentication request sent
    AuthRequested { attempt: u64 },

    /// Verdict of an authentication attempt
    AuthResult { result: AuthResult },

    SessionStarted { session: u64 },

    SessionEnded { reason: EndReason },

    CommandDispatched { id: u64, command: String },

    CommandCompleted { id: u64, reply: String },

    CommandFailed { id: u64, error: String },

    /// Host-side action requested by the backend
    Action {
        action_type: String,
        #[serde(default)]
        params: serde_json::Value,
    },

    SpeakingChanged { speaking: bool },

    /// Snapshot after any change
    StatusChanged { status: ControllerStatus },
}

impl From<&CommandAction> for StateEvent {
    fn from(action: &CommandAction) -> Self {
        StateEvent::Action {
            action_type: action.action_type.clone(),
            params: action.params.clone(),
        }
    }
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::ListeningChanged { state } => write!(f, "LISTENING_CHANGED ({})", state),
            StateEvent::ListeningFailed { error } => write!(f, "LISTENING_FAILED ({})", error),
            StateEvent::WakeWordDetected { phrase, .. } => {
                write!(f, "WAKE_WORD_DETECTED ({})", phrase)
            }
            StateEvent::VisualCue { active } => write!(f, "VISUAL_CUE ({})", active),
            StateEvent::ActivationExpired => write!(f, "ACTIVATION_EXPIRED"),
            StateEvent::AuthRequested { attempt } => write!(f, "AUTH_REQUESTED (#{})", attempt),
            StateEvent::AuthResult { result } => {
                write!(f, "AUTH_RESULT (authenticated={})", result.authenticated)
            }
            StateEvent::SessionStarted { session } => write!(f, "SESSION_STARTED (#{})", session),
            StateEvent::SessionEnded { reason } => write!(f, "SESSION_ENDED ({})", reason),
            StateEvent::CommandDispatched { id, .. } => write!(f, "COMMAND_DISPATCHED (#{})", id),
            StateEvent::CommandCompleted { id, .. } => write!(f, "COMMAND_COMPLETED (#{})", id),
            StateEvent::CommandFailed { id, error } => {
                write!(f, "COMMAND_FAILED (#{}: {})", id, error)
            }
            StateEvent::Action { action_type, .. } => write!(f, "ACTION ({})", action_type),
            StateEvent::SpeakingChanged { speaking } => {
                write!(f, "SPEAKING_CHANGED ({})", speaking)
            }
            StateEvent::StatusChanged { .. } => write!(f, "STATUS_CHANGED"),
        }
    }
}
