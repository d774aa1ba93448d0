//! Backend API contract consumed by the controller
//!
//! The controller only sees the [`Backend`] trait; [`HttpBackend`] speaks the
//! assistant server's REST endpoints.

mod http;
mod protocol;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpBackend;
pub use protocol::{
    AuthEvidence, AuthResult, CommandAction, CommandContext, CommandReply, CommandRequest,
    VoiceProfile,
};

/// Failures talking to the backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request timed out")]
    Timeout,

    #[error("backend unreachable: {0}")]
    Transport(String),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("failed to read voice evidence {path:?}: {source}")]
    Evidence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// The backend answered, but refused the request
    pub fn is_rejection(&self) -> bool {
        matches!(self, BackendError::Status { .. })
    }
}

/// Request/response contract of the assistant backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the stored voice profile used to seed runtime configuration
    async fn fetch_profile(&self) -> Result<VoiceProfile, BackendError>;

    /// Verify the speaker against the stored voice print
    async fn authenticate(&self, evidence: AuthEvidence) -> Result<AuthResult, BackendError>;

    /// Interpret a spoken command
    async fn process_command(&self, request: CommandRequest) -> Result<CommandReply, BackendError>;
}
