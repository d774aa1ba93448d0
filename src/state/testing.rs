//! Fakes and a driver for controller tests
//!
//! Time is expected to be paused; nothing elapses unless a test advances it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::backend::{
    AuthEvidence, AuthResult, Backend, BackendError, CommandAction, CommandReply, CommandRequest,
    VoiceProfile,
};
use crate::config::Settings;
use crate::events::StateEvent;
use crate::recognition::{EngineEvent, EngineEventKind, RecognitionError, RecognitionPort, TranscriptEvent};
use crate::speech::{SynthesisError, SynthesisPort};

use super::{ControlRequest, Controller, ControllerInput, ControllerOptions, HostHooks};

#[derive(Default)]
pub struct RecognizerLog {
    pub starts: Vec<u64>,
    pub stops: usize,
}

pub struct FakeRecognizer(pub Arc<Mutex<RecognizerLog>>);

impl RecognitionPort for FakeRecognizer {
    fn start(&mut self, generation: u64) -> Result<(), RecognitionError> {
        self.0.lock().unwrap().starts.push(generation);
        Ok(())
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().stops += 1;
    }
}

pub struct FakeSynthesizer(pub Arc<Mutex<Vec<String>>>);

impl SynthesisPort for FakeSynthesizer {
    fn speak(&mut self, _utterance: u64, text: &str) -> Result<(), SynthesisError> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn cancel(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub enum FakeAuth {
    Accept,
    Reject,
    Unreachable,
}

#[derive(Debug, Clone)]
pub enum FakeCommand {
    Reply {
        reply: String,
        action: Option<String>,
    },
    Refuse,
    Unreachable,
}

pub struct FakeBackend {
    auth: Mutex<FakeAuth>,
    auth_delay: Mutex<Duration>,
    auth_calls: AtomicUsize,
    command: Mutex<FakeCommand>,
    command_delay: Mutex<Duration>,
    commands: Mutex<Vec<CommandRequest>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            auth: Mutex::new(FakeAuth::Accept),
            auth_delay: Mutex::new(Duration::ZERO),
            auth_calls: AtomicUsize::new(0),
            command: Mutex::new(FakeCommand::Reply {
                reply: "Pronto".to_string(),
                action: None,
            }),
            command_delay: Mutex::new(Duration::ZERO),
            commands: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBackend {
    pub fn set_auth(&self, auth: FakeAuth) {
        *self.auth.lock().unwrap() = auth;
    }

    pub fn set_auth_delay(&self, delay: Duration) {
        *self.auth_delay.lock().unwrap() = delay;
    }

    pub fn set_command(&self, command: FakeCommand) {
        *self.command.lock().unwrap() = command;
    }

    pub fn set_command_delay(&self, delay: Duration) {
        *self.command_delay.lock().unwrap() = delay;
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<CommandRequest> {
        self.commands.lock().unwrap().clone()
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_profile(&self) -> Result<VoiceProfile, BackendError> {
        Ok(VoiceProfile::default())
    }

    async fn authenticate(&self, _evidence: AuthEvidence) -> Result<AuthResult, BackendError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        let (auth, delay) = (*self.auth.lock().unwrap(), *self.auth_delay.lock().unwrap());
        pause(delay).await;

        match auth {
            FakeAuth::Accept => Ok(AuthResult {
                authenticated: true,
                confidence: Some(0.93),
                reason: None,
            }),
            FakeAuth::Reject => Ok(AuthResult {
                authenticated: false,
                confidence: Some(0.2),
                reason: Some("voz não corresponde".to_string()),
            }),
            FakeAuth::Unreachable => Err(BackendError::Transport("connection refused".to_string())),
        }
    }

    async fn process_command(&self, request: CommandRequest) -> Result<CommandReply, BackendError> {
        self.commands.lock().unwrap().push(request);
        let command = self.command.lock().unwrap().clone();
        let delay = *self.command_delay.lock().unwrap();
        pause(delay).await;

        match command {
            FakeCommand::Reply { reply, action } => Ok(CommandReply {
                reply,
                action: action.map(|action_type| CommandAction {
                    action_type,
                    params: serde_json::Value::Null,
                }),
            }),
            FakeCommand::Refuse => Err(BackendError::Status {
                status: 422,
                message: "comando inválido".to_string(),
            }),
            FakeCommand::Unreachable => Err(BackendError::Timeout),
        }
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    actions: Mutex<Vec<String>>,
    auth_results: Mutex<Vec<AuthResult>>,
}

impl RecordingHooks {
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    pub fn auth_results(&self) -> Vec<AuthResult> {
        self.auth_results.lock().unwrap().clone()
    }
}

impl HostHooks for RecordingHooks {
    fn on_action(&self, action: &CommandAction) {
        self.actions.lock().unwrap().push(action.action_type.clone());
    }

    fn on_auth_result(&self, result: &AuthResult) {
        self.auth_results.lock().unwrap().push(result.clone());
    }
}

pub struct Harness {
    pub controller: Controller,
    pub backend: Arc<FakeBackend>,
    pub hooks: Arc<RecordingHooks>,
    recognizer: Arc<Mutex<RecognizerLog>>,
    spoken: Arc<Mutex<Vec<String>>>,
    event_rx: broadcast::Receiver<StateEvent>,
}

impl Harness {
    /// Build a started, listening controller from default settings
    pub fn new(tweak: impl FnOnce(&mut ControllerOptions)) -> Self {
        let mut options = ControllerOptions::from_settings(&Settings::default());
        tweak(&mut options);

        let recognizer = Arc::new(Mutex::new(RecognizerLog::default()));
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(FakeBackend::default());
        let hooks = Arc::new(RecordingHooks::default());
        let (event_tx, event_rx) = broadcast::channel(1024);

        let mut controller = Controller::new(
            options,
            Box::new(FakeRecognizer(recognizer.clone())),
            Box::new(FakeSynthesizer(spoken.clone())),
            backend.clone(),
            hooks.clone(),
            event_tx,
        );
        controller.start();

        let generation = controller.recognition_generation();
        controller.handle(ControllerInput::Engine(EngineEvent {
            generation,
            kind: EngineEventKind::Started,
        }));

        Self {
            controller,
            backend,
            hooks,
            recognizer,
            spoken,
            event_rx,
        }
    }

    /// Feed an engine event from the current recognizer run
    pub async fn engine(&mut self, kind: EngineEventKind) {
        let generation = self.controller.recognition_generation();
        self.controller
            .handle(ControllerInput::Engine(EngineEvent { generation, kind }));
        self.settle().await;
    }

    pub async fn hear(&mut self, text: &str, is_final: bool) {
        self.engine(EngineEventKind::Transcript(TranscriptEvent::new(text, is_final)))
            .await;
    }

    pub async fn control(&mut self, request: ControlRequest) {
        self.controller.handle(ControllerInput::Control(request));
        self.settle().await;
    }

    pub async fn advance(&mut self, duration: Duration) {
        tokio::time::advance(duration).await;
        self.settle().await;
    }

    /// Let spawned tasks run and feed their completions back in
    pub async fn settle(&mut self) {
        loop {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            if self.controller.drain_internal() == 0 {
                break;
            }
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn recognizer_starts(&self) -> usize {
        self.recognizer.lock().unwrap().starts.len()
    }

    /// Events published since the last call
    pub fn events(&mut self) -> Vec<StateEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}
