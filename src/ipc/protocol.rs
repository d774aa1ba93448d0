//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::config::ConfigPatch;
use crate::events::StateEvent;
use crate::state::{ControlRequest, ControllerStatus};

/// Largest frame accepted from a client
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from the host application to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to controller events
    Subscribe,

    /// Change runtime configuration
    SetConfig { patch: ConfigPatch },

    /// End the session immediately
    Logout,

    StartListening,

    StopListening,

    /// Typed command, handled like a spoken one
    Command { text: String },
}

impl Request {
    /// The controller request this maps to, if it is one
    pub fn into_control(self) -> Option<ControlRequest> {
        match self {
            Request::SetConfig { patch } => Some(ControlRequest::SetConfig(patch)),
            Request::Logout => Some(ControlRequest::Logout),
            Request::StartListening => Some(ControlRequest::StartListening),
            Request::StopListening => Some(ControlRequest::StopListening),
            Request::Command { text } => Some(ControlRequest::Command(text)),
            Request::GetStatus | Request::Ping | Request::Subscribe => None,
        }
    }
}

/// Responses from daemon to host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Control request accepted by the controller
    Ack,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to host (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Controller event occurred
    Event { event: StateEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Latest controller snapshot, once the controller has published one
    pub controller: Option<ControllerStatus>,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: 0,
            controller: None,
        }
    }
}
