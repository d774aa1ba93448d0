//! Core controller implementation
//!
//! Handles transitions between Idle, Activated and SessionActive based on
//! transcripts, timers, backend verdicts and host requests.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{AuthDecision, AuthGate, AuthState};
use crate::backend::{AuthEvidence, AuthResult, Backend, BackendError, CommandReply, VoiceProfile};
use crate::config::{ConfigPatch, Configuration, Settings, Timings};
use crate::dispatch::{failure_phrase, Admission, CommandDispatcher};
use crate::events::StateEvent;
use crate::recognition::{
    EngineEvent, LifecycleAction, ListeningState, RecognitionManager, RecognitionPort,
    TranscriptEvent,
};
use crate::session::{EndReason, SessionManager};
use crate::speech::{Phrase, Phrasebook, SpeechFeedback, SynthesisEvent, SynthesisPort};
use crate::wake::{WakeMatch, WakeWordDetector};

use super::timers::{TimerKind, Timers};
use super::{ActivationState, ControlRequest, ControllerInput, ControllerStatus, HostHooks, Internal};

/// Everything the controller needs to know up front
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub config: Configuration,
    pub timings: Timings,
    pub wake_phrases: Vec<String>,
    pub user_id: String,
    pub preferred_name: String,
}

impl ControllerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            config: settings.configuration(),
            timings: settings.timings(),
            wake_phrases: settings.wake_phrases.clone(),
            user_id: settings.user_id.clone(),
            preferred_name: settings.preferred_name.clone(),
        }
    }

    /// Seed from the stored voice profile
    pub fn apply_profile(&mut self, profile: &VoiceProfile) {
        self.config.apply_profile(profile);
        if let Some(name) = &profile.preferred_name {
            self.preferred_name = name.clone();
        }
    }
}

/// Input channels drained by [`Controller::run`]
pub struct ControllerInputs {
    pub engine: mpsc::Receiver<EngineEvent>,
    pub synthesis: mpsc::Receiver<SynthesisEvent>,
    pub control: mpsc::Receiver<ControlRequest>,
}

/// The voice activation and session controller
pub struct Controller {
    config: Configuration,
    timings: Timings,
    recognition: RecognitionManager,
    detector: WakeWordDetector,
    activation: ActivationState,
    auth: AuthGate,
    sessions: SessionManager,
    dispatcher: CommandDispatcher,
    speech: SpeechFeedback,
    phrases: Phrasebook,
    backend: Arc<dyn Backend>,
    hooks: Arc<dyn HostHooks>,
    event_tx: broadcast::Sender<StateEvent>,
    timers: Timers,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: Option<mpsc::UnboundedReceiver<Internal>>,
    /// Latest transcript shown to the user
    transcript: String,
    last_reply: Option<String>,
    /// Command held while authentication is pending
    deferred: Option<String>,
    last_status: Option<ControllerStatus>,
}

impl Controller {
    pub fn new(
        options: ControllerOptions,
        recognizer: Box<dyn RecognitionPort>,
        synthesizer: Box<dyn SynthesisPort>,
        backend: Arc<dyn Backend>,
        hooks: Arc<dyn HostHooks>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        Self {
            config: options.config,
            timings: options.timings,
            recognition: RecognitionManager::new(recognizer, &options.timings),
            detector: WakeWordDetector::new(&options.wake_phrases),
            activation: ActivationState::Idle,
            auth: AuthGate::new(),
            sessions: SessionManager::new(options.timings.idle_timeout),
            dispatcher: CommandDispatcher::new(options.user_id),
            speech: SpeechFeedback::new(synthesizer),
            phrases: Phrasebook::new(options.preferred_name),
            backend,
            hooks,
            event_tx,
            timers: Timers::new(internal_tx.clone()),
            internal_tx,
            internal_rx: Some(internal_rx),
            transcript: String::new(),
            last_reply: None,
            deferred: None,
            last_status: None,
        }
    }

    pub fn activation(&self) -> ActivationState {
        self.activation
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn listening(&self) -> ListeningState {
        self.recognition.state()
    }

    pub fn session_active(&self) -> bool {
        self.sessions.is_active()
    }

    pub fn config(&self) -> Configuration {
        self.config
    }

    pub fn status(&self) -> ControllerStatus {
        let now = Instant::now();
        ControllerStatus {
            listening: self.recognition.state(),
            activation: self.activation,
            auth: self.auth.state(),
            session_active: self.sessions.is_active(),
            session_remaining_ms: self
                .sessions
                .current()
                .map(|s| s.deadline().saturating_duration_since(now).as_millis() as u64),
            speaking: self.speech.is_speaking(),
            transcript: self.transcript.clone(),
            last_reply: self.last_reply.clone(),
            config: self.config,
            listening_error: self.recognition.blocked().cloned(),
        }
    }

    /// Begin listening if configured to, and publish the first status
    pub fn start(&mut self) {
        info!(config = ?self.config, "controller started");
        if self.config.always_listening {
            self.start_listening();
        }
        self.publish_status();
    }

    /// Process inputs until every input channel closes
    pub async fn run(&mut self, mut inputs: ControllerInputs) {
        let Some(mut internal_rx) = self.internal_rx.take() else {
            warn!("controller already running");
            return;
        };

        self.start();

        loop {
            tokio::select! {
                Some(internal) = internal_rx.recv() => {
                    self.handle_internal(internal);
                    self.publish_status();
                }
                Some(event) = inputs.engine.recv() => {
                    self.handle(ControllerInput::Engine(event));
                }
                Some(event) = inputs.synthesis.recv() => {
                    self.handle(ControllerInput::Synthesis(event));
                }
                Some(request) = inputs.control.recv() => {
                    self.handle(ControllerInput::Control(request));
                }
                else => break,
            }
        }

        self.internal_rx = Some(internal_rx);
        info!("controller stopped");
    }

    /// Apply one external input
    pub fn handle(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Engine(event) => {
                let action = self.recognition.handle(event, self.config.always_listening);
                self.apply_lifecycle(action);
            }
            ControllerInput::Synthesis(event) => self.speech.handle(event),
            ControllerInput::Control(request) => self.handle_control(request),
        }
        self.publish_status();
    }

    /// Stop everything: recognizer, speech, timers, in-flight calls
    pub fn shutdown(&mut self) {
        info!("controller shutting down");
        self.end_session(EndReason::Shutdown);
        self.recognition.stop();
        self.speech.cancel();
        self.timers.cancel_all();
        self.dispatcher.abandon_all();
        self.publish_status();
    }

    pub(crate) fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::TimerFired { kind, token } => {
                if self.timers.claim(kind, token) {
                    self.timer_fired(kind);
                }
            }
            Internal::AuthCompleted { attempt, result } => self.auth_completed(attempt, result),
            Internal::CommandCompleted { id, result } => self.command_completed(id, result),
        }
    }

    fn handle_control(&mut self, request: ControlRequest) {
        debug!(?request, "control request");
        match request {
            ControlRequest::SetConfig(patch) => self.set_config(&patch),
            ControlRequest::Logout => self.end_session(EndReason::Logout),
            ControlRequest::StartListening => self.start_listening(),
            ControlRequest::StopListening => {
                self.recognition.stop();
                self.timers.cancel(TimerKind::Restart);
            }
            ControlRequest::Command(text) => self.route_command(&text),
        }
    }

    fn set_config(&mut self, patch: &ConfigPatch) {
        let before = self.config;
        self.config.apply(patch);
        info!(config = ?self.config, "configuration updated");

        if before.always_listening && !self.config.always_listening {
            self.recognition.stop();
            self.timers.cancel(TimerKind::Restart);
            self.end_session(EndReason::ListeningDisabled);
        } else if !before.always_listening && self.config.always_listening {
            self.start_listening();
        }

        if before.auth_required && !self.config.auth_required {
            self.end_session(EndReason::AuthDisabled);
            self.auth.abandon();
        }
    }

    fn start_listening(&mut self) {
        let action = self.recognition.start(self.config.always_listening);
        self.apply_lifecycle(action);
    }

    fn apply_lifecycle(&mut self, action: LifecycleAction) {
        match action {
            LifecycleAction::None => {}
            LifecycleAction::Transcript(transcript) => self.on_transcript(transcript),
            LifecycleAction::ScheduleRestart(delay) => self.timers.arm(TimerKind::Restart, delay),
            LifecycleAction::Halted(error) => {
                self.timers.cancel(TimerKind::Restart);
                self.emit(StateEvent::ListeningFailed { error });
            }
        }
    }

    fn on_transcript(&mut self, transcript: TranscriptEvent) {
        match self.activation {
            ActivationState::Idle => {
                if let Some(found) = self.detector.observe(&transcript, self.config.wake_sensitivity) {
                    self.transcript = transcript.text.clone();
                    self.activate(found, &transcript);
                }
            }
            ActivationState::Activated | ActivationState::Expired => {
                self.transcript = transcript.text.clone();
                if transcript.is_final {
                    self.route_command(&transcript.text);
                }
            }
        }
    }

    fn activate(&mut self, found: WakeMatch, transcript: &TranscriptEvent) {
        info!(phrase = %found.phrase, "wake phrase detected");
        self.activation = ActivationState::Activated;
        self.emit(StateEvent::WakeWordDetected {
            phrase: found.phrase,
            transcript: found.transcript,
        });
        if self.config.visual_feedback {
            self.emit(StateEvent::VisualCue { active: true });
        }
        self.timers.arm(TimerKind::WakeWindow, self.timings.wake_window);
        self.deferred = found.remainder;

        match self.auth.begin(self.config.auth_required, self.sessions.is_active()) {
            AuthDecision::Bypass => self.open_session(Phrase::Greeting),
            AuthDecision::Request { attempt } => {
                self.emit(StateEvent::AuthRequested { attempt });
                let evidence = AuthEvidence {
                    transcript: transcript.text.clone(),
                    audio_path: transcript.audio_path.clone(),
                };
                let backend = Arc::clone(&self.backend);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = backend.authenticate(evidence).await;
                    let _ = tx.send(Internal::AuthCompleted { attempt, result });
                });
            }
            AuthDecision::Joined { attempt } => {
                debug!(attempt, "activation waits for authentication in flight");
            }
        }
    }

    fn auth_completed(&mut self, attempt: u64, result: Result<AuthResult, BackendError>) {
        if !self.auth.is_outstanding(attempt) {
            debug!(attempt, "dropping verdict for abandoned authentication");
            return;
        }

        let (verdict, unreachable) = match result {
            Ok(verdict) => (verdict, false),
            Err(e) => {
                warn!(error = %e, attempt, "voice authentication failed");
                (AuthResult::unverified(e.to_string()), true)
            }
        };
        self.hooks.on_auth_result(&verdict);

        match self.auth.resolve(attempt, verdict.authenticated) {
            None => {}
            Some(AuthState::Authenticated) => self.open_session(Phrase::AuthGreeting),
            Some(_) => {
                let phrase = if unreachable {
                    Phrase::AuthError
                } else {
                    Phrase::AuthRejected
                };
                self.reject(phrase);
            }
        }
    }

    /// Authentication failed: no session, back to idle after a short display
    fn reject(&mut self, phrase: Phrase) {
        self.deferred = None;
        self.timers.cancel(TimerKind::WakeWindow);
        self.say(phrase);
        self.timers
            .arm(TimerKind::FailureDisplay, self.timings.failure_display);
    }

    fn open_session(&mut self, greeting: Phrase) {
        if self.sessions.start(Instant::now()) {
            if let Some(session) = self.sessions.current() {
                self.emit(StateEvent::SessionStarted { session: session.id });
            }
        }
        self.timers
            .arm(TimerKind::SessionIdle, self.sessions.idle_timeout());
        self.timers.cancel(TimerKind::WakeWindow);
        self.timers.cancel(TimerKind::FailureDisplay);
        self.say(greeting);

        if let Some(command) = self.deferred.take() {
            self.dispatch(&command);
        }
    }

    fn touch_session(&mut self) {
        if self.sessions.touch(Instant::now()) {
            self.timers
                .arm(TimerKind::SessionIdle, self.sessions.idle_timeout());
        }
    }

    fn route_command(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        let command = self.detector.strip_wake_phrase(text);
        if command.is_empty() {
            // Wake phrase repeated inside the session
            self.touch_session();
            return;
        }

        if self.auth.is_pending() {
            debug!(command = %command, "holding command until authentication resolves");
            self.deferred = Some(command);
            return;
        }

        self.dispatch(&command);
    }

    fn dispatch(&mut self, command: &str) {
        let session_active = self.sessions.is_active();
        match self
            .dispatcher
            .admit(command, session_active, self.config.auth_required)
        {
            Admission::Ignore => {}
            Admission::AuthenticateFirst => self.say(Phrase::AuthenticateFirst),
            Admission::Dispatch { id, request } => {
                self.touch_session();
                self.emit(StateEvent::CommandDispatched {
                    id,
                    command: request.command.clone(),
                });

                let backend = Arc::clone(&self.backend);
                let tx = self.internal_tx.clone();
                let task = tokio::spawn(async move {
                    let result = backend.process_command(request).await;
                    let _ = tx.send(Internal::CommandCompleted { id, result });
                });
                self.dispatcher.track(id, task);
            }
        }
    }

    fn command_completed(&mut self, id: u64, result: Result<CommandReply, BackendError>) {
        if !self.dispatcher.finish(id) {
            debug!(id, "dropping reply for abandoned command");
            return;
        }

        match result {
            Ok(reply) => {
                info!(id, "command completed");
                self.emit(StateEvent::CommandCompleted {
                    id,
                    reply: reply.reply.clone(),
                });
                if !reply.reply.trim().is_empty() {
                    self.last_reply = Some(reply.reply.clone());
                }
                self.speech.speak(&reply.reply);
                if let Some(action) = &reply.action {
                    self.hooks.on_action(action);
                }
            }
            Err(e) => {
                warn!(id, error = %e, "command failed");
                self.emit(StateEvent::CommandFailed {
                    id,
                    error: e.to_string(),
                });
                self.say(failure_phrase(&e));
            }
        }
    }

    fn timer_fired(&mut self, kind: TimerKind) {
        debug!(?kind, "timer fired");
        match kind {
            TimerKind::WakeWindow => {
                if self.sessions.is_active() || self.activation != ActivationState::Activated {
                    return;
                }
                info!("wake window lapsed without a session");
                self.activation = ActivationState::Expired;
                self.emit(StateEvent::ActivationExpired);
                self.reset_activation();
            }
            TimerKind::SessionIdle => self.end_session(EndReason::IdleTimeout),
            TimerKind::FailureDisplay => {
                if !self.sessions.is_active() {
                    self.reset_activation();
                }
            }
            TimerKind::Restart => {
                let action = self.recognition.restart_due(self.config.always_listening);
                self.apply_lifecycle(action);
            }
        }
    }

    /// Tear down the session, if any, and return to idle. Idempotent.
    fn end_session(&mut self, reason: EndReason) {
        self.timers.cancel(TimerKind::SessionIdle);
        let ended = match reason {
            EndReason::IdleTimeout => self.sessions.expire(),
            _ => self.sessions.force_end(reason),
        };

        let abandoned = self.dispatcher.abandon_all();
        if abandoned > 0 {
            debug!(abandoned, "abandoned commands in flight");
        }
        self.last_reply = None;
        self.reset_activation();

        if ended.is_some() {
            self.emit(StateEvent::SessionEnded { reason });
        }
    }

    fn reset_activation(&mut self) {
        self.timers.cancel(TimerKind::WakeWindow);
        self.timers.cancel(TimerKind::FailureDisplay);
        self.auth.reset();
        self.transcript.clear();
        self.deferred = None;

        if self.activation != ActivationState::Idle {
            self.activation = ActivationState::Idle;
            if self.config.visual_feedback {
                self.emit(StateEvent::VisualCue { active: false });
            }
        }
    }

    fn say(&mut self, phrase: Phrase) {
        let text = self.phrases.render(phrase);
        self.speech.speak(&text);
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }

    /// Publish a status snapshot if anything visible changed
    fn publish_status(&mut self) {
        let status = self.status();
        let previous = self.last_status.replace(status.clone());

        if let Some(previous) = &previous {
            if previous.listening != status.listening {
                info!(from = %previous.listening, to = %status.listening, "listening state changed");
                self.emit(StateEvent::ListeningChanged {
                    state: status.listening,
                });
            }
            if previous.speaking != status.speaking {
                self.emit(StateEvent::SpeakingChanged {
                    speaking: status.speaking,
                });
            }
            if previous.activation != status.activation || previous.session_active != status.session_active {
                info!(
                    activation = %status.activation,
                    auth = %status.auth,
                    session_active = status.session_active,
                    "state transition"
                );
            }
        }

        let changed = previous.map_or(true, |previous| !previous.same_state(&status));
        if changed {
            self.emit(StateEvent::StatusChanged { status });
        }
    }

    #[cfg(test)]
    pub(crate) fn recognition_generation(&self) -> u64 {
        self.recognition.generation()
    }

    #[cfg(test)]
    pub(crate) fn timer_armed(&self, kind: TimerKind) -> bool {
        self.timers.is_armed(kind)
    }

    /// Handle every queued completion; returns how many there were
    #[cfg(test)]
    pub(crate) fn drain_internal(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let next = match self.internal_rx.as_mut() {
                Some(rx) => rx.try_recv().ok(),
                None => None,
            };
            let Some(internal) = next else { break };
            self.handle_internal(internal);
            self.publish_status();
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::recognition::{EngineEventKind, RecognitionError};
    use crate::state::testing::{FakeAuth, FakeCommand, Harness};

    #[tokio::test(start_paused = true)]
    async fn test_wake_without_auth_opens_session() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.hear("ia", true).await;

        assert_eq!(h.controller.activation(), ActivationState::Activated);
        assert!(h.controller.session_active());
        assert_eq!(h.backend.auth_calls(), 0);
        let greetings = h.spoken().iter().filter(|s| s.contains("Como posso ajudar")).count();
        assert_eq!(greetings, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_fires_once_per_activation() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.hear("ia", false).await;
        h.hear("ia", true).await;
        h.hear("oi ia", true).await;

        let detections = h
            .events()
            .iter()
            .filter(|e| matches!(e, StateEvent::WakeWordDetected { .. }))
            .count();
        assert_eq!(detections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_voice_returns_to_idle() {
        let mut h = Harness::new(|_| {});
        h.backend.set_auth(FakeAuth::Reject);
        h.hear("ia", true).await;

        assert_eq!(h.controller.auth_state(), AuthState::Failed);
        assert!(!h.controller.session_active());
        let rejection = "Desculpe, não reconheci sua voz. Tente novamente.";
        assert_eq!(h.spoken().iter().filter(|s| *s == rejection).count(), 1);

        h.advance(Duration::from_millis(2_999)).await;
        assert_eq!(h.controller.activation(), ActivationState::Activated);
        h.advance(Duration::from_millis(2)).await;
        assert_eq!(h.controller.activation(), ActivationState::Idle);
        assert_eq!(h.controller.auth_state(), AuthState::NotRequired);
        assert!(!h.controller.session_active());
        assert_eq!(h.hooks.auth_results().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_auth_fails_closed() {
        let mut h = Harness::new(|_| {});
        h.backend.set_auth(FakeAuth::Unreachable);
        h.hear("ia", true).await;

        assert!(!h.controller.session_active());
        assert_eq!(h.controller.auth_state(), AuthState::Failed);
        assert!(h.spoken().contains(&"Erro na autenticação. Tente novamente.".to_string()));
        assert!(!h.hooks.auth_results()[0].authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticated_voice_opens_session() {
        let mut h = Harness::new(|o| o.preferred_name = "Ana".to_string());
        h.hear("oi ia", true).await;

        assert!(h.controller.session_active());
        assert_eq!(h.controller.auth_state(), AuthState::Authenticated);
        assert!(h
            .spoken()
            .contains(&"Voz reconhecida! Olá Ana, como posso ajudar?".to_string()));
        assert!(!h.controller.timer_armed(TimerKind::WakeWindow));
        assert!(h.controller.timer_armed(TimerKind::SessionIdle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_auth_request_in_flight() {
        let mut h = Harness::new(|_| {});
        h.backend.set_auth_delay(Duration::from_secs(15));
        h.hear("ia", true).await;
        assert_eq!(h.controller.auth_state(), AuthState::Pending);

        // Wake window lapses while the backend is still thinking
        h.advance(Duration::from_secs(10)).await;
        assert_eq!(h.controller.activation(), ActivationState::Idle);
        assert!(h
            .events()
            .iter()
            .any(|e| matches!(e, StateEvent::ActivationExpired)));

        // Re-activation joins the request instead of issuing another
        h.hear("ia", true).await;
        assert_eq!(h.controller.auth_state(), AuthState::Pending);
        h.advance(Duration::from_secs(5)).await;

        assert_eq!(h.backend.auth_calls(), 1);
        assert!(h.controller.session_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_activation_drops_late_verdict() {
        let mut h = Harness::new(|_| {});
        h.backend.set_auth_delay(Duration::from_secs(15));
        h.hear("ia", true).await;
        h.advance(Duration::from_secs(10)).await;
        h.advance(Duration::from_secs(5)).await;

        assert!(!h.controller.session_active());
        assert_eq!(h.controller.activation(), ActivationState::Idle);
        assert_eq!(h.controller.auth_state(), AuthState::NotRequired);
        assert_eq!(h.hooks.auth_results().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_ends_session() {
        let mut h = Harness::new(|o| {
            o.config.auth_required = false;
            o.timings.idle_timeout = Duration::from_secs(1);
        });
        h.hear("ia", true).await;
        assert!(h.controller.session_active());

        h.advance(Duration::from_millis(1_001)).await;
        assert!(!h.controller.session_active());
        assert_eq!(h.controller.activation(), ActivationState::Idle);
        assert!(h.events().iter().any(|e| matches!(
            e,
            StateEvent::SessionEnded {
                reason: EndReason::IdleTimeout
            }
        )));

        // Non-wake speech is no longer dispatched
        h.hear("abrir agenda", true).await;
        assert!(h.backend.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_start_touches_session() {
        let mut h = Harness::new(|o| {
            o.config.auth_required = false;
            o.timings.idle_timeout = Duration::from_secs(60);
        });
        h.backend.set_command_delay(Duration::from_secs(30));
        h.hear("ia", true).await;

        h.advance(Duration::from_secs(50)).await;
        h.hear("qual é a minha agenda", true).await;
        assert_eq!(h.backend.commands().len(), 1);

        // The reply lands 30s later without touching the session again
        h.advance(Duration::from_secs(59)).await;
        assert!(h.controller.session_active());
        h.advance(Duration::from_secs(2)).await;
        assert!(!h.controller.session_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_keeps_session() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.hear("ia", true).await;

        h.backend.set_command(FakeCommand::Refuse);
        h.hear("transferir dinheiro", true).await;
        assert!(h.controller.session_active());
        assert_eq!(
            h.spoken().last().unwrap(),
            "Desculpe, não consegui processar seu comando."
        );

        h.backend.set_command(FakeCommand::Unreachable);
        h.hear("transferir dinheiro", true).await;
        assert!(h.controller.session_active());
        assert_eq!(h.controller.activation(), ActivationState::Activated);
        assert_eq!(h.spoken().last().unwrap(), "Ocorreu um erro. Tente novamente.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_without_session_prompts_for_auth() {
        let mut h = Harness::new(|_| {});
        h.control(ControlRequest::Command("ver saldo".to_string())).await;

        assert!(h.backend.commands().is_empty());
        assert_eq!(
            h.spoken().last().unwrap(),
            "Por favor, autentique-se primeiro dizendo \"IA\"."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_spoken_and_action_forwarded() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.backend.set_command(FakeCommand::Reply {
            reply: "Abrindo sua agenda".to_string(),
            action: Some("open_calendar".to_string()),
        });
        h.hear("ia, abrir agenda", true).await;

        let commands = h.backend.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "abrir agenda");
        assert!(commands[0].context.session_active);
        assert_eq!(h.spoken().last().unwrap(), "Abrindo sua agenda");
        assert_eq!(h.hooks.actions(), vec!["open_calendar".to_string()]);
        assert_eq!(h.controller.status().last_reply.as_deref(), Some("Abrindo sua agenda"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_held_during_authentication() {
        let mut h = Harness::new(|_| {});
        h.backend.set_auth_delay(Duration::from_secs(2));
        h.hear("ia", true).await;
        h.hear("lembrete para amanhã", true).await;
        assert!(h.backend.commands().is_empty());

        h.advance(Duration::from_secs(2)).await;
        assert!(h.controller.session_active());
        let commands = h.backend.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "lembrete para amanhã");
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_drops_late_reply() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.backend.set_command_delay(Duration::from_secs(5));
        h.hear("ia", true).await;
        h.hear("ver contatos", true).await;
        let spoken_before = h.spoken().len();

        h.control(ControlRequest::Logout).await;
        assert!(!h.controller.session_active());
        h.advance(Duration::from_secs(10)).await;

        assert_eq!(h.spoken().len(), spoken_before);
        assert!(h.events().iter().any(|e| matches!(
            e,
            StateEvent::SessionEnded {
                reason: EndReason::Logout
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_always_listening_stops_for_good() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.hear("ia", true).await;
        assert_eq!(h.controller.listening(), ListeningState::Listening);

        h.control(ControlRequest::SetConfig(ConfigPatch {
            always_listening: Some(false),
            ..ConfigPatch::default()
        }))
        .await;
        assert_eq!(h.controller.listening(), ListeningState::Stopped);
        assert!(!h.controller.session_active());

        // A late end-of-run from the engine must not bring it back
        h.engine(EngineEventKind::Ended).await;
        h.advance(Duration::from_secs(5)).await;
        assert_eq!(h.controller.listening(), ListeningState::Stopped);
        assert_eq!(h.recognizer_starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_end_restarts_without_touching_session() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.hear("ia", true).await;

        h.engine(EngineEventKind::Ended).await;
        assert_eq!(h.controller.listening(), ListeningState::Restarting);
        h.advance(Duration::from_millis(500)).await;
        assert_eq!(h.controller.listening(), ListeningState::Starting);
        assert_eq!(h.recognizer_starts(), 2);
        assert!(h.controller.session_active());
        assert_eq!(h.controller.activation(), ActivationState::Activated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_halts_until_user_restarts() {
        let mut h = Harness::new(|_| {});
        h.engine(EngineEventKind::Error(RecognitionError::PermissionDenied(
            "not-allowed".to_string(),
        )))
        .await;
        h.advance(Duration::from_secs(60)).await;

        assert_eq!(h.controller.listening(), ListeningState::Stopped);
        assert_eq!(h.recognizer_starts(), 1);
        assert!(h.controller.status().listening_error.is_some());
        assert!(h
            .events()
            .iter()
            .any(|e| matches!(e, StateEvent::ListeningFailed { .. })));

        h.control(ControlRequest::StartListening).await;
        assert_eq!(h.controller.listening(), ListeningState::Starting);
        assert!(h.controller.status().listening_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_auth_ends_session() {
        let mut h = Harness::new(|_| {});
        h.hear("ia", true).await;
        assert!(h.controller.session_active());

        h.control(ControlRequest::SetConfig(ConfigPatch {
            auth_required: Some(false),
            ..ConfigPatch::default()
        }))
        .await;
        assert!(!h.controller.session_active());
        assert_eq!(h.controller.activation(), ActivationState::Idle);
        assert!(!h.controller.timer_armed(TimerKind::SessionIdle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_auth_while_pending_drops_verdict() {
        let mut h = Harness::new(|_| {});
        h.backend.set_auth(FakeAuth::Reject);
        h.backend.set_auth_delay(Duration::from_secs(5));
        h.hear("ia", true).await;
        assert_eq!(h.controller.auth_state(), AuthState::Pending);

        h.control(ControlRequest::SetConfig(ConfigPatch {
            auth_required: Some(false),
            ..ConfigPatch::default()
        }))
        .await;
        assert_eq!(h.controller.activation(), ActivationState::Idle);
        assert_eq!(h.controller.auth_state(), AuthState::NotRequired);

        h.hear("ia", true).await;
        assert!(h.controller.session_active());
        assert_eq!(h.backend.auth_calls(), 1);

        h.advance(Duration::from_secs(5)).await;
        assert!(h.controller.session_active());
        assert_eq!(h.controller.auth_state(), AuthState::NotRequired);
        assert!(h.hooks.auth_results().is_empty());
        let rejection = "Desculpe, não reconheci sua voz. Tente novamente.";
        assert!(!h.spoken().iter().any(|s| s == rejection));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visual_cue_follows_setting() {
        let mut h = Harness::new(|o| {
            o.config.auth_required = false;
            o.config.visual_feedback = false;
        });
        h.hear("ia", true).await;
        assert!(!h
            .events()
            .iter()
            .any(|e| matches!(e, StateEvent::VisualCue { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_published_on_change() {
        let mut h = Harness::new(|o| o.config.auth_required = false);
        h.events();
        h.hear("ia", true).await;

        let statuses: Vec<ControllerStatus> = h
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StateEvent::StatusChanged { status } => Some(status),
                _ => None,
            })
            .collect();
        let last = statuses.last().unwrap();
        assert!(last.session_active);
        assert_eq!(last.session_remaining_ms, Some(300_000));
        assert!(last.speaking);
    }
}
