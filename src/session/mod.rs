//! Authenticated session bookkeeping
//!
//! The session's idle timer itself lives in the controller's timer table
//! (one slot per purpose); this module only tracks the session record.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    IdleTimeout,
    Logout,
    ListeningDisabled,
    AuthDisabled,
    Shutdown,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::IdleTimeout => write!(f, "idle timeout"),
            EndReason::Logout => write!(f, "logout"),
            EndReason::ListeningDisabled => write!(f, "listening disabled"),
            EndReason::AuthDisabled => write!(f, "auth disabled"),
            EndReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub started_at: Instant,
    pub last_activity_at: Instant,
    pub idle_timeout: Duration,
}

impl Session {
    pub fn deadline(&self) -> Instant {
        self.last_activity_at + self.idle_timeout
    }
}

pub struct SessionManager {
    current: Option<Session>,
    idle_timeout: Duration,
    started: u64,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            current: None,
            idle_timeout,
            started: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Open a session, or extend the open one. Returns true if a new session
    /// was created.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.touch(now) {
            return false;
        }

        self.started += 1;
        self.current = Some(Session {
            id: self.started,
            started_at: now,
            last_activity_at: now,
            idle_timeout: self.idle_timeout,
        });
        info!(
            session = self.started,
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "session started"
        );
        true
    }

    /// Record activity. Returns false if there is no session.
    pub fn touch(&mut self, now: Instant) -> bool {
        match self.current.as_mut() {
            Some(session) => {
                session.last_activity_at = now;
                debug!(session = session.id, "session touched");
                true
            }
            None => false,
        }
    }

    /// Idle timer fired. Idempotent.
    pub fn expire(&mut self) -> Option<Session> {
        let ended = self.current.take();
        if let Some(session) = &ended {
            info!(
                session = session.id,
                lasted_ms = session.started_at.elapsed().as_millis() as u64,
                "session expired"
            );
        }
        ended
    }

    /// Immediate teardown on logout or a disabling toggle. Idempotent.
    pub fn force_end(&mut self, reason: EndReason) -> Option<Session> {
        let ended = self.current.take();
        if let Some(session) = &ended {
            info!(session = session.id, %reason, "session ended");
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_start_touch_expire() {
        let mut sessions = SessionManager::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(sessions.start(t0));
        assert_eq!(sessions.current().unwrap().deadline(), t0 + Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(30)).await;
        let t1 = Instant::now();
        assert!(!sessions.start(t1), "second start extends instead of replacing");
        let session = *sessions.current().unwrap();
        assert_eq!(session.id, 1);
        assert_eq!(session.started_at, t0);
        assert_eq!(session.deadline(), t1 + Duration::from_secs(60));

        assert!(sessions.expire().is_some());
        assert!(sessions.expire().is_none());
        assert!(!sessions.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_without_session() {
        let mut sessions = SessionManager::new(Duration::from_secs(60));
        assert!(!sessions.touch(Instant::now()));
        assert!(sessions.force_end(EndReason::Logout).is_none());
    }
}
