//! Command dispatch bookkeeping
//!
//! The dispatcher decides whether a final transcript may reach the backend
//! and tracks the calls in flight so a session teardown can abandon them.
//! The controller runs the actual backend call on a spawned task.

use std::collections::HashMap;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::{BackendError, CommandContext, CommandRequest};
use crate::speech::Phrase;

/// Verdict on a final transcript
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Send to the backend as call `id`
    Dispatch { id: u64, request: CommandRequest },
    /// No session and authentication is on; the backend is not called
    AuthenticateFirst,
    /// Nothing to send
    Ignore,
}

pub struct CommandDispatcher {
    user_id: String,
    next_id: u64,
    in_flight: HashMap<u64, JoinHandle<()>>,
}

impl CommandDispatcher {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            next_id: 0,
            in_flight: HashMap::new(),
        }
    }

    pub fn admit(&mut self, text: &str, session_active: bool, auth_required: bool) -> Admission {
        let command = text.trim();
        if command.is_empty() {
            return Admission::Ignore;
        }
        if !session_active && auth_required {
            debug!(command, "command refused without session");
            return Admission::AuthenticateFirst;
        }

        self.next_id += 1;
        info!(id = self.next_id, command, "dispatching command");
        Admission::Dispatch {
            id: self.next_id,
            request: CommandRequest {
                command: command.to_string(),
                context: CommandContext {
                    session_active,
                    user_id: self.user_id.clone(),
                    timestamp: Utc::now().to_rfc3339(),
                },
            },
        }
    }

    /// Remember the task running call `id`
    pub fn track(&mut self, id: u64, task: JoinHandle<()>) {
        self.in_flight.insert(id, task);
    }

    /// Call `id` reported back. False if it was abandoned meanwhile.
    pub fn finish(&mut self, id: u64) -> bool {
        self.in_flight.remove(&id).is_some()
    }

    /// Abort every call in flight; late replies are then dropped
    pub fn abandon_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for (id, task) in self.in_flight.drain() {
            debug!(id, "abandoning command");
            task.abort();
        }
        count
    }
}

/// Spoken fallback for a failed command
pub fn failure_phrase(error: &BackendError) -> Phrase {
    if error.is_rejection() {
        Phrase::CommandFailed
    } else {
        Phrase::GenericError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_without_session_when_auth_required() {
        let mut dispatcher = CommandDispatcher::new("u1");
        assert_eq!(
            dispatcher.admit("abrir agenda", false, true),
            Admission::AuthenticateFirst
        );
        assert!(matches!(
            dispatcher.admit("abrir agenda", false, false),
            Admission::Dispatch { id: 1, .. }
        ));
    }

    #[test]
    fn test_blank_command_ignored() {
        let mut dispatcher = CommandDispatcher::new("u1");
        assert_eq!(dispatcher.admit("  ", true, true), Admission::Ignore);
    }

    #[test]
    fn test_request_carries_context() {
        let mut dispatcher = CommandDispatcher::new("u1");
        let Admission::Dispatch { request, .. } = dispatcher.admit(" saldo da conta ", true, true)
        else {
            panic!("expected dispatch");
        };
        assert_eq!(request.command, "saldo da conta");
        assert!(request.context.session_active);
        assert_eq!(request.context.user_id, "u1");
        assert!(chrono::DateTime::parse_from_rfc3339(&request.context.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_calls_do_not_finish() {
        let mut dispatcher = CommandDispatcher::new("u1");
        dispatcher.track(1, tokio::spawn(std::future::pending::<()>()));
        dispatcher.track(2, tokio::spawn(std::future::pending::<()>()));
        assert!(dispatcher.finish(1));
        assert_eq!(dispatcher.abandon_all(), 1);
        assert!(!dispatcher.finish(2));
        assert_eq!(dispatcher.abandon_all(), 0);
    }

    #[test]
    fn test_failure_phrase_by_error_kind() {
        let refused = BackendError::Status {
            status: 500,
            message: "erro".to_string(),
        };
        assert_eq!(failure_phrase(&refused), Phrase::CommandFailed);
        assert_eq!(failure_phrase(&BackendError::Timeout), Phrase::GenericError);
    }
}
