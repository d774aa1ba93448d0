//! Configuration loading and management
//!
//! Two layers live here:
//! - [`Settings`]: daemon settings read once at startup from built-in
//!   defaults, an optional `voice-gate.toml`, the per-user config file and
//!   `VOICE_GATE_*` environment variables.
//! - [`Configuration`]: the user-toggleable runtime snapshot the controller
//!   reads between inputs. Seeded from settings, then from the backend voice
//!   profile, then patched by the host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config as Layers, Environment, File};
use serde::{Deserialize, Serialize};

use crate::backend::VoiceProfile;

/// Prefix for environment overrides, e.g. `VOICE_GATE_API_BASE_URL`
pub const ENV_PREFIX: &str = "VOICE_GATE";

/// Environment variable naming an explicit settings file
pub const CONFIG_FILE_ENV: &str = "VOICE_GATE_CONFIG";

/// Daemon settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Base URL of the assistant backend
    pub api_base_url: String,
    /// Bearer token sent with every backend request
    pub api_token: Option<String>,
    /// Voice-profile status endpoint
    pub profile_path: String,
    /// Voice authentication endpoint
    pub auth_path: String,
    /// Command processing endpoint
    pub command_path: String,
    /// Per-request timeout for backend calls
    pub request_timeout_secs: u64,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Identifier sent in the command context
    pub user_id: String,
    /// Name used in spoken greetings until the profile says otherwise
    pub preferred_name: String,
    /// Phrasings that activate the assistant
    pub wake_phrases: Vec<String>,

    // Runtime configuration seed
    pub wake_sensitivity: f32,
    pub auth_required: bool,
    pub always_listening: bool,
    pub visual_feedback: bool,

    // Timers
    pub wake_window_ms: u64,
    pub idle_timeout_ms: u64,
    pub failure_display_ms: u64,
    pub restart_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub max_restart_backoff_ms: u64,

    /// Streaming recognizer executable, one JSON transcript per stdout line
    pub recognizer_command: String,
    pub recognizer_args: Vec<String>,
    /// Synthesizer executable; the utterance text is appended as the last argument
    pub synthesizer_command: String,
    pub synthesizer_args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_dir = PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("voice-gate");

        Self {
            api_base_url: "http://127.0.0.1:5000".to_string(),
            api_token: None,
            profile_path: "/api/voice-auth/voice-profile/status".to_string(),
            auth_path: "/api/voice-auth/voice-profile/authenticate".to_string(),
            command_path: "/api/assistente/processar-comando".to_string(),
            request_timeout_secs: 15,
            socket_path: data_dir.join("daemon.sock"),
            user_id: "local".to_string(),
            preferred_name: "Usuário".to_string(),
            wake_phrases: vec!["ia".to_string(), "hey ia".to_string(), "oi ia".to_string()],
            wake_sensitivity: 0.8,
            auth_required: true,
            always_listening: true,
            visual_feedback: true,
            wake_window_ms: 10_000,
            idle_timeout_ms: 5 * 60 * 1000,
            failure_display_ms: 3_000,
            restart_backoff_ms: 500,
            error_backoff_ms: 1_000,
            max_restart_backoff_ms: 30_000,
            recognizer_command: "voice-gate-recognizer".to_string(),
            recognizer_args: vec!["--lang".to_string(), "pt-BR".to_string()],
            synthesizer_command: "espeak-ng".to_string(),
            synthesizer_args: vec!["-v".to_string(), "pt-br".to_string(), "-s".to_string(), "150".to_string()],
        }
    }
}

impl Settings {
    /// Load settings from defaults, config files and environment
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(explicit.as_deref())
    }

    /// Load settings, additionally merging `file` (which must exist) last
    /// among the file sources
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let d = Self::default();
        let mut builder = Layers::builder()
            .set_default("api_base_url", d.api_base_url)?
            .set_default("profile_path", d.profile_path)?
            .set_default("auth_path", d.auth_path)?
            .set_default("command_path", d.command_path)?
            .set_default("request_timeout_secs", d.request_timeout_secs)?
            .set_default("socket_path", d.socket_path.to_string_lossy().into_owned())?
            .set_default("user_id", d.user_id)?
            .set_default("preferred_name", d.preferred_name)?
            .set_default("wake_phrases", d.wake_phrases)?
            .set_default("wake_sensitivity", f64::from(d.wake_sensitivity))?
            .set_default("auth_required", d.auth_required)?
            .set_default("always_listening", d.always_listening)?
            .set_default("visual_feedback", d.visual_feedback)?
            .set_default("wake_window_ms", d.wake_window_ms)?
            .set_default("idle_timeout_ms", d.idle_timeout_ms)?
            .set_default("failure_display_ms", d.failure_display_ms)?
            .set_default("restart_backoff_ms", d.restart_backoff_ms)?
            .set_default("error_backoff_ms", d.error_backoff_ms)?
            .set_default("max_restart_backoff_ms", d.max_restart_backoff_ms)?
            .set_default("recognizer_command", d.recognizer_command)?
            .set_default("recognizer_args", d.recognizer_args)?
            .set_default("synthesizer_command", d.synthesizer_command)?
            .set_default("synthesizer_args", d.synthesizer_args)?
            .add_source(File::with_name("voice-gate").required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.config/voice-gate/voice-gate",
                    std::env::var("HOME").unwrap_or_default()
                ))
                .required(false),
            );

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("wake_phrases")
                    .with_list_parse_key("recognizer_args")
                    .with_list_parse_key("synthesizer_args"),
            )
            .build()
            .context("failed to assemble settings")?
            .try_deserialize()
            .context("failed to parse settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.wake_sensitivity) {
            bail!(
                "invalid wake_sensitivity {}: must be between 0.0 and 1.0",
                self.wake_sensitivity
            );
        }
        if self.wake_phrases.iter().all(|p| p.trim().is_empty()) {
            bail!("wake_phrases must contain at least one phrase");
        }
        for (name, value) in [
            ("wake_window_ms", self.wake_window_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("request_timeout_secs", self.request_timeout_secs),
            ("restart_backoff_ms", self.restart_backoff_ms),
            ("error_backoff_ms", self.error_backoff_ms),
        ] {
            if value == 0 {
                bail!("{name} must be greater than 0");
            }
        }
        if self.max_restart_backoff_ms < self.error_backoff_ms.max(self.restart_backoff_ms) {
            bail!("max_restart_backoff_ms must not be smaller than the restart backoffs");
        }
        Ok(())
    }

    /// Runtime configuration seed
    pub fn configuration(&self) -> Configuration {
        Configuration {
            wake_sensitivity: self.wake_sensitivity,
            auth_required: self.auth_required,
            always_listening: self.always_listening,
            visual_feedback: self.visual_feedback,
        }
    }

    pub fn timings(&self) -> Timings {
        Timings {
            wake_window: Duration::from_millis(self.wake_window_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            failure_display: Duration::from_millis(self.failure_display_ms),
            restart_backoff: Duration::from_millis(self.restart_backoff_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            max_restart_backoff: Duration::from_millis(self.max_restart_backoff_ms),
        }
    }
}

/// Durations driving the controller's timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How long an activation waits for a session before lapsing
    pub wake_window: Duration,
    /// Session inactivity limit
    pub idle_timeout: Duration,
    /// How long a failed authentication stays on display
    pub failure_display: Duration,
    /// Delay before restarting after the engine ends naturally
    pub restart_backoff: Duration,
    /// Base delay before restarting after a transient engine error
    pub error_backoff: Duration,
    /// Cap for the doubled error backoff
    pub max_restart_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Settings::default().timings()
    }
}

/// User-toggleable runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub wake_sensitivity: f32,
    pub auth_required: bool,
    pub always_listening: bool,
    pub visual_feedback: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Settings::default().configuration()
    }
}

impl Configuration {
    /// Apply a host patch. Sensitivity is clamped into [0, 1].
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(sensitivity) = patch.wake_sensitivity {
            self.wake_sensitivity = sensitivity.clamp(0.0, 1.0);
        }
        if let Some(auth_required) = patch.auth_required {
            self.auth_required = auth_required;
        }
        if let Some(always_listening) = patch.always_listening {
            self.always_listening = always_listening;
        }
        if let Some(visual_feedback) = patch.visual_feedback {
            self.visual_feedback = visual_feedback;
        }
    }

    /// Override with whatever the stored voice profile specifies
    pub fn apply_profile(&mut self, profile: &VoiceProfile) {
        self.apply(&ConfigPatch {
            wake_sensitivity: profile.wake_sensitivity,
            auth_required: profile.voice_auth_enabled,
            always_listening: profile.always_listening,
            visual_feedback: None,
        });
    }
}

/// Partial update of [`Configuration`] sent by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_sensitivity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_listening: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_feedback: Option<bool>,
}
