//! Backend wire types
//!
//! Field names follow the assistant server; the profile envelope is mapped
//! into the flat [`VoiceProfile`] the controller uses.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Voice-profile settings stored server side. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceProfile {
    pub preferred_name: Option<String>,
    pub wake_sensitivity: Option<f32>,
    pub voice_auth_enabled: Option<bool>,
    pub always_listening: Option<bool>,
}

/// `GET voice-profile/status` response body
#[derive(Debug, Deserialize)]
pub(crate) struct ProfileEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub profile: Option<ProfileBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileBody {
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub preferred_name: Option<String>,
    #[serde(default)]
    pub wake_word_sensitivity: Option<f32>,
    #[serde(default)]
    pub voice_auth_enabled: Option<bool>,
    #[serde(default)]
    pub voice_activation_enabled: Option<bool>,
}

impl From<ProfileBody> for VoiceProfile {
    fn from(body: ProfileBody) -> Self {
        if !body.exists {
            return VoiceProfile::default();
        }
        VoiceProfile {
            preferred_name: body.preferred_name.filter(|n| !n.trim().is_empty()),
            wake_sensitivity: body.wake_word_sensitivity,
            voice_auth_enabled: body.voice_auth_enabled,
            always_listening: body.voice_activation_enabled,
        }
    }
}

/// What the controller has to offer as proof of identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthEvidence {
    /// Transcript of the activating utterance
    pub transcript: String,
    /// Audio captured by the recognizer for that utterance, if any
    pub audio_path: Option<PathBuf>,
}

/// Outcome of one voice authentication attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, alias = "erro", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuthResult {
    /// A failed attempt with no verdict from the backend
    pub fn unverified(reason: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            confidence: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    pub context: CommandContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandContext {
    pub session_active: bool,
    pub user_id: String,
    /// RFC 3339 time the command was dispatched
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CommandAction>,
}

/// Host-side action requested by the backend. Opaque to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// `POST processar-comando` request body
#[derive(Debug, Serialize)]
pub(crate) struct CommandBody<'a> {
    pub comando: &'a str,
    pub contexto: ContextBody<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ContextBody<'a> {
    pub usuario: &'a str,
    pub sessao_ativa: bool,
    pub timestamp: &'a str,
}

impl<'a> From<&'a CommandRequest> for CommandBody<'a> {
    fn from(request: &'a CommandRequest) -> Self {
        CommandBody {
            comando: &request.command,
            contexto: ContextBody {
                usuario: &request.context.user_id,
                sessao_ativa: request.context.session_active,
                timestamp: &request.context.timestamp,
            },
        }
    }
}

/// `POST processar-comando` response body. The rule-based route answers
/// with `mensagem`/`dados`, the conversational one with
/// `resposta`/`parametros`.
#[derive(Debug, Deserialize)]
pub(crate) struct ReplyBody {
    #[serde(default)]
    pub resposta: Option<String>,
    #[serde(default)]
    pub mensagem: Option<String>,
    #[serde(default)]
    pub acao: Option<String>,
    #[serde(default)]
    pub parametros: Option<serde_json::Value>,
    #[serde(default)]
    pub dados: Option<serde_json::Value>,
}

impl From<ReplyBody> for CommandReply {
    fn from(body: ReplyBody) -> Self {
        let action = body
            .acao
            .filter(|a| !a.trim().is_empty())
            .map(|action_type| CommandAction {
                action_type,
                params: body
                    .parametros
                    .or(body.dados)
                    .unwrap_or(serde_json::Value::Null),
            });
        CommandReply {
            reply: body.resposta.or(body.mensagem).unwrap_or_default(),
            action,
        }
    }
}
