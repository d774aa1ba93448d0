//! Voice authentication gate
//!
//! Decides, per activation, whether a backend voice check is needed, and
//! holds the single in-flight request as a lock: while a request is out,
//! further activations join it instead of issuing another.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Authentication state of the current activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    NotRequired,
    Pending,
    Authenticated,
    Failed,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::NotRequired => write!(f, "NotRequired"),
            AuthState::Pending => write!(f, "Pending"),
            AuthState::Authenticated => write!(f, "Authenticated"),
            AuthState::Failed => write!(f, "Failed"),
        }
    }
}

/// What an activation needs before a session can open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Auth disabled, or a session is already open
    Bypass,
    /// Issue attempt `attempt` to the backend
    Request { attempt: u64 },
    /// A request is already in flight; wait for its verdict
    Joined { attempt: u64 },
}

#[derive(Debug, Default)]
pub struct AuthGate {
    state: AuthState,
    in_flight: Option<u64>,
    attempts: u64,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == AuthState::Pending
    }

    /// Called once per activation
    pub fn begin(&mut self, auth_required: bool, session_active: bool) -> AuthDecision {
        if !auth_required {
            self.state = AuthState::NotRequired;
            return AuthDecision::Bypass;
        }

        if let Some(attempt) = self.in_flight {
            debug!(attempt, "voice authentication already in flight");
            self.state = AuthState::Pending;
            return AuthDecision::Joined { attempt };
        }
        if session_active {
            return AuthDecision::Bypass;
        }

        self.attempts += 1;
        self.in_flight = Some(self.attempts);
        self.state = AuthState::Pending;
        info!(attempt = self.attempts, "voice authentication requested");
        AuthDecision::Request {
            attempt: self.attempts,
        }
    }

    /// True while `attempt` is the request holding the lock
    pub fn is_outstanding(&self, attempt: u64) -> bool {
        self.in_flight == Some(attempt)
    }

    /// Record the verdict for `attempt`. Returns the new state, or `None` if
    /// the attempt is unknown or its activation was torn down meanwhile.
    pub fn resolve(&mut self, attempt: u64, authenticated: bool) -> Option<AuthState> {
        if self.in_flight != Some(attempt) {
            debug!(attempt, "ignoring verdict for unknown attempt");
            return None;
        }
        self.in_flight = None;

        if self.state != AuthState::Pending {
            debug!(attempt, "discarding verdict for abandoned activation");
            return None;
        }

        self.state = if authenticated {
            AuthState::Authenticated
        } else {
            AuthState::Failed
        };
        info!(attempt, state = %self.state, "voice authentication resolved");
        Some(self.state)
    }

    /// Activation torn down. An in-flight request keeps the lock until its
    /// verdict arrives.
    pub fn reset(&mut self) {
        self.state = AuthState::NotRequired;
    }

    /// Authentication switched off: release the lock so the verdict of the
    /// request in flight is never applied.
    pub fn abandon(&mut self) {
        if let Some(attempt) = self.in_flight.take() {
            info!(attempt, "voice authentication abandoned");
        }
        self.state = AuthState::NotRequired;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_when_not_required() {
        let mut gate = AuthGate::new();
        assert_eq!(gate.begin(false, false), AuthDecision::Bypass);
        assert_eq!(gate.state(), AuthState::NotRequired);
    }

    #[test]
    fn test_bypass_keeps_state_for_open_session() {
        let mut gate = AuthGate::new();
        let AuthDecision::Request { attempt } = gate.begin(true, false) else {
            panic!("expected a request");
        };
        gate.resolve(attempt, true);
        assert_eq!(gate.begin(true, true), AuthDecision::Bypass);
        assert_eq!(gate.state(), AuthState::Authenticated);
    }

    #[test]
    fn test_single_request_in_flight() {
        let mut gate = AuthGate::new();
        assert_eq!(gate.begin(true, false), AuthDecision::Request { attempt: 1 });
        assert_eq!(gate.begin(true, false), AuthDecision::Joined { attempt: 1 });
        assert_eq!(gate.resolve(1, false), Some(AuthState::Failed));
        assert_eq!(gate.begin(true, false), AuthDecision::Request { attempt: 2 });
    }

    #[test]
    fn test_abandoned_request_still_locks() {
        let mut gate = AuthGate::new();
        gate.begin(true, false);
        gate.reset();
        assert_eq!(gate.state(), AuthState::NotRequired);

        // Late verdict for the abandoned activation is dropped
        assert_eq!(gate.resolve(1, true), None);
        assert_eq!(gate.state(), AuthState::NotRequired);
    }

    #[test]
    fn test_new_activation_joins_abandoned_request() {
        let mut gate = AuthGate::new();
        gate.begin(true, false);
        gate.reset();
        assert_eq!(gate.begin(true, false), AuthDecision::Joined { attempt: 1 });
        assert_eq!(gate.resolve(1, true), Some(AuthState::Authenticated));
    }

    #[test]
    fn test_bypass_ignores_lock_when_not_required() {
        let mut gate = AuthGate::new();
        gate.begin(true, false);
        gate.reset();
        assert_eq!(gate.begin(false, false), AuthDecision::Bypass);
        assert_eq!(gate.state(), AuthState::NotRequired);
    }

    #[test]
    fn test_abandon_releases_lock() {
        let mut gate = AuthGate::new();
        gate.begin(true, false);
        gate.abandon();
        assert!(!gate.is_outstanding(1));
        assert_eq!(gate.resolve(1, false), None);
        assert_eq!(gate.state(), AuthState::NotRequired);
        assert_eq!(gate.begin(true, false), AuthDecision::Request { attempt: 2 });
    }

    #[test]
    fn test_stale_attempt_ignored() {
        let mut gate = AuthGate::new();
        gate.begin(true, false);
        assert_eq!(gate.resolve(9, true), None);
        assert!(gate.is_pending());
    }
}
