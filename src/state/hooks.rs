//! Callbacks into the host application

use tokio::sync::broadcast;
use tracing::debug;

use crate::backend::{AuthResult, CommandAction};
use crate::events::StateEvent;

/// Host-side handlers. The controller hands off and never interprets.
pub trait HostHooks: Send + Sync {
    /// Backend asked the host to perform `action`
    fn on_action(&self, action: &CommandAction);

    /// An authentication attempt finished, successful or not
    fn on_auth_result(&self, result: &AuthResult);
}

/// Forwards hook calls onto the event broadcast, for IPC subscribers
pub struct EventHooks {
    events: broadcast::Sender<StateEvent>,
}

impl EventHooks {
    pub fn new(events: broadcast::Sender<StateEvent>) -> Self {
        Self { events }
    }
}

impl HostHooks for EventHooks {
    fn on_action(&self, action: &CommandAction) {
        debug!(action_type = %action.action_type, "forwarding action to host");
        let _ = self.events.send(StateEvent::from(action));
    }

    fn on_auth_result(&self, result: &AuthResult) {
        let _ = self.events.send(StateEvent::AuthResult {
            result: result.clone(),
        });
    }
}
