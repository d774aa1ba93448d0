//! REST client for the assistant backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

use crate::config::Settings;

use super::protocol::{CommandBody, ProfileEnvelope, ReplyBody};
use super::{AuthEvidence, AuthResult, Backend, BackendError, CommandReply, CommandRequest, VoiceProfile};

/// [`Backend`] over HTTP with bearer-token auth
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
    profile_path: String,
    auth_path: String,
    command_path: String,
}

impl HttpBackend {
    pub fn new(settings: &Settings) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            token: settings.api_token.clone().filter(|t| !t.is_empty()),
            profile_path: settings.profile_path.clone(),
            auth_path: settings.auth_path.clone(),
            command_path: settings.command_path.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        self.authorize(request).send().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else if e.is_decode() {
        BackendError::Decode(e.to_string())
    } else {
        BackendError::Transport(e.to_string())
    }
}

/// Turn a non-2xx response into [`BackendError::Status`], preferring the
/// server's own error message
async fn status_error(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("erro")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);
    BackendError::Status { status, message }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_profile(&self) -> Result<VoiceProfile, BackendError> {
        let response = self.send(self.client.get(self.url(&self.profile_path))).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let envelope: ProfileEnvelope = response.json().await.map_err(transport_error)?;
        if !envelope.success {
            return Err(BackendError::Decode("profile request reported failure".to_string()));
        }
        Ok(envelope.profile.map(VoiceProfile::from).unwrap_or_default())
    }

    async fn authenticate(&self, evidence: AuthEvidence) -> Result<AuthResult, BackendError> {
        let audio = match &evidence.audio_path {
            Some(path) => tokio::fs::read(path)
                .await
                .map_err(|source| BackendError::Evidence {
                    path: path.clone(),
                    source,
                })?,
            None => Vec::new(),
        };
        debug!(bytes = audio.len(), "submitting voice evidence");

        let form = Form::new()
            .text("transcript", evidence.transcript)
            .part("audio", Part::bytes(audio).file_name("evidence.wav"));

        let response = self
            .send(self.client.post(self.url(&self.auth_path)).multipart(form))
            .await?;

        // The server answers rejected attempts with an error status but a
        // well-formed verdict body
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        match serde_json::from_str::<AuthResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) if !status.is_success() => Err(BackendError::Status {
                status: status.as_u16(),
                message: body,
            }),
            Err(e) => Err(BackendError::Decode(e.to_string())),
        }
    }

    async fn process_command(&self, request: CommandRequest) -> Result<CommandReply, BackendError> {
        let response = self
            .send(
                self.client
                    .post(self.url(&self.command_path))
                    .json(&CommandBody::from(&request)),
            )
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: ReplyBody = response.json().await.map_err(transport_error)?;
        Ok(body.into())
    }
}
