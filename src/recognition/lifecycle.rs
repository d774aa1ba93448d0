//! Recognition lifecycle: start, stop, and restart-after-failure policy

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Timings;

use super::{EngineEvent, EngineEventKind, RecognitionError, RecognitionPort, TranscriptEvent};

/// Listening state of the recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListeningState {
    /// Not running, and nothing scheduled
    #[default]
    Stopped,
    /// Launched, waiting for the engine to report in
    Starting,
    /// Engine running
    Listening,
    /// Engine died; a restart is scheduled
    Restarting,
}

impl std::fmt::Display for ListeningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListeningState::Stopped => write!(f, "Stopped"),
            ListeningState::Starting => write!(f, "Starting"),
            ListeningState::Listening => write!(f, "Listening"),
            ListeningState::Restarting => write!(f, "Restarting"),
        }
    }
}

/// What the controller has to do after a lifecycle step
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    None,
    /// A transcript from the current run
    Transcript(TranscriptEvent),
    /// Arm the restart timer
    ScheduleRestart(Duration),
    /// Listening stopped for good until the user intervenes
    Halted(RecognitionError),
}

/// Owns the recognition engine and its [`ListeningState`]
pub struct RecognitionManager {
    port: Box<dyn RecognitionPort>,
    state: ListeningState,
    /// Run counter; events from older runs are dropped
    generation: u64,
    /// Set by an explicit stop, cleared by an explicit start
    stopped_by_user: bool,
    /// Last non-retryable failure
    blocked: Option<RecognitionError>,
    /// Consecutive runtime errors without a transcript in between
    error_streak: u32,
    restart_backoff: Duration,
    error_backoff: Duration,
    max_backoff: Duration,
}

impl RecognitionManager {
    pub fn new(port: Box<dyn RecognitionPort>, timings: &Timings) -> Self {
        Self {
            port,
            state: ListeningState::Stopped,
            generation: 0,
            stopped_by_user: false,
            blocked: None,
            error_streak: 0,
            restart_backoff: timings.restart_backoff,
            error_backoff: timings.error_backoff,
            max_backoff: timings.max_restart_backoff,
        }
    }

    pub fn state(&self) -> ListeningState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The failure that halted listening, if any
    pub fn blocked(&self) -> Option<&RecognitionError> {
        self.blocked.as_ref()
    }

    /// Explicit start. `keep_alive` enables automatic restarts for this run.
    pub fn start(&mut self, keep_alive: bool) -> LifecycleAction {
        if matches!(self.state, ListeningState::Starting | ListeningState::Listening) {
            debug!(state = %self.state, "recognition already running");
            return LifecycleAction::None;
        }
        self.stopped_by_user = false;
        self.blocked = None;
        self.error_streak = 0;
        self.launch(keep_alive)
    }

    /// Explicit stop. Suppresses any pending restart.
    pub fn stop(&mut self) {
        if self.state != ListeningState::Stopped {
            info!(from = %self.state, "stopping recognition");
        }
        self.port.stop();
        self.state = ListeningState::Stopped;
        self.stopped_by_user = true;
    }

    /// Process an engine callback
    pub fn handle(&mut self, event: EngineEvent, keep_alive: bool) -> LifecycleAction {
        if event.generation != self.generation
            || matches!(self.state, ListeningState::Stopped | ListeningState::Restarting)
        {
            debug!(
                generation = event.generation,
                current = self.generation,
                state = %self.state,
                "ignoring engine event from inactive run"
            );
            return LifecycleAction::None;
        }

        match event.kind {
            EngineEventKind::Started => {
                self.state = ListeningState::Listening;
                info!(generation = self.generation, "listening");
                LifecycleAction::None
            }
            EngineEventKind::Transcript(transcript) => {
                self.state = ListeningState::Listening;
                self.error_streak = 0;
                LifecycleAction::Transcript(transcript)
            }
            EngineEventKind::Error(error) => {
                self.port.stop();
                self.fail(error, keep_alive)
            }
            EngineEventKind::Ended => {
                if keep_alive && !self.stopped_by_user {
                    self.state = ListeningState::Restarting;
                    debug!(delay_ms = self.restart_backoff.as_millis() as u64, "engine ended, restarting");
                    LifecycleAction::ScheduleRestart(self.restart_backoff)
                } else {
                    self.state = ListeningState::Stopped;
                    info!("engine ended");
                    LifecycleAction::None
                }
            }
        }
    }

    /// The restart timer fired
    pub fn restart_due(&mut self, keep_alive: bool) -> LifecycleAction {
        if self.state != ListeningState::Restarting {
            return LifecycleAction::None;
        }
        if !keep_alive || self.stopped_by_user {
            self.state = ListeningState::Stopped;
            return LifecycleAction::None;
        }
        self.launch(keep_alive)
    }

    fn launch(&mut self, keep_alive: bool) -> LifecycleAction {
        self.generation += 1;
        self.state = ListeningState::Starting;
        debug!(generation = self.generation, "starting recognition engine");

        match self.port.start(self.generation) {
            Ok(()) => LifecycleAction::None,
            Err(error) => self.fail(error, keep_alive),
        }
    }

    fn fail(&mut self, error: RecognitionError, keep_alive: bool) -> LifecycleAction {
        if !error.is_retryable() {
            warn!(%error, "recognition halted");
            self.state = ListeningState::Stopped;
            self.blocked = Some(error.clone());
            return LifecycleAction::Halted(error);
        }

        if keep_alive && !self.stopped_by_user {
            self.error_streak = self.error_streak.saturating_add(1);
            let delay = self.error_delay();
            warn!(%error, streak = self.error_streak, delay_ms = delay.as_millis() as u64, "recognition error, restarting");
            self.state = ListeningState::Restarting;
            LifecycleAction::ScheduleRestart(delay)
        } else {
            warn!(%error, "recognition error");
            self.state = ListeningState::Stopped;
            LifecycleAction::None
        }
    }

    /// Error backoff doubled per consecutive failure, capped
    fn error_delay(&self) -> Duration {
        let exponent = self.error_streak.saturating_sub(1).min(16);
        self.error_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}
