//! One cancellable timer slot per purpose
//!
//! Arming a slot aborts whatever was armed there before. Each firing carries
//! the token it was armed with, and only the token currently in the slot can
//! be claimed, so a timer that fired just before being superseded is
//! recognized as stale.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::Internal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Activation waiting for a session
    WakeWindow,
    /// Session inactivity
    SessionIdle,
    /// Rejection shown before returning to idle
    FailureDisplay,
    /// Recognizer restart backoff
    Restart,
}

struct Slot {
    token: u64,
    task: JoinHandle<()>,
}

pub(crate) struct Timers {
    tx: mpsc::UnboundedSender<Internal>,
    next_token: u64,
    slots: HashMap<TimerKind, Slot>,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<Internal>) -> Self {
        Self {
            tx,
            next_token: 0,
            slots: HashMap::new(),
        }
    }

    pub fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        self.next_token += 1;
        let token = self.next_token;
        let tx = self.tx.clone();
        let deadline = Instant::now() + delay;

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(Internal::TimerFired { kind, token });
        });
        debug!(?kind, token, delay_ms = delay.as_millis() as u64, "timer armed");
        self.slots.insert(kind, Slot { token, task });
    }

    /// Returns true if the slot was armed
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots.remove(&kind) {
            Some(slot) => {
                slot.task.abort();
                debug!(?kind, token = slot.token, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Accept a firing. False if the slot was re-armed or cancelled since.
    pub fn claim(&mut self, kind: TimerKind, token: u64) -> bool {
        match self.slots.get(&kind) {
            Some(slot) if slot.token == token => {
                self.slots.remove(&kind);
                true
            }
            _ => {
                debug!(?kind, token, "stale timer ignored");
                false
            }
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.task.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
