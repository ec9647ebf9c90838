use async_trait::async_trait;
use tracing::debug;

use crate::api::{error_summary_from_body, ChatMessage, ChatRequest};
use crate::core::config::ChatSettings;
use crate::core::constants::{
    CHAT_COMPLETIONS_PATH, DEFAULT_MODEL, DEFAULT_TEMPERATURE, PROBE_CONTENT, PROBE_MAX_TOKENS,
};
use crate::core::credential::{CredentialProbe, ValidationError};
use crate::core::message::Message;
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

/// HTTP access to the chat completions endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    settings: ChatSettings,
}

impl ApiClient {
    pub fn new(settings: ChatSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_http_client(http, settings))
    }

    pub fn with_http_client(http: reqwest::Client, settings: ChatSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn endpoint(&self) -> String {
        construct_api_url(&self.settings.base_url, CHAT_COMPLETIONS_PATH)
    }

    /// Wire payload for a generation: the system preamble followed by the
    /// transcript, minus any empty assistant placeholder.
    pub fn generation_request(&self, transcript: &[Message]) -> ChatRequest {
        let preamble = self.settings.system_prompt.trim();
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        if !preamble.is_empty() {
            messages.push(ChatMessage::from(&Message::system(preamble)));
        }
        messages.extend(
            transcript
                .iter()
                .filter(|message| !message.is_empty_assistant())
                .map(ChatMessage::from),
        );

        ChatRequest {
            model: self.settings.model.clone(),
            messages,
            stream: true,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Fixed validation payload; session model overrides do not apply.
    fn probe_request(&self) -> ChatRequest {
        ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![ChatMessage::from(&Message::user(PROBE_CONTENT))],
            stream: false,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: PROBE_MAX_TOKENS,
        }
    }

    pub async fn send(
        &self,
        api_key: &str,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let http_request = self
            .http
            .post(self.endpoint())
            .header("Content-Type", "application/json");
        let http_request = add_auth_headers(http_request, api_key, &self.settings);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "Sending chat request"
        );
        http_request.json(request).send().await
    }
}

#[async_trait]
impl CredentialProbe for ApiClient {
    async fn probe(&self, secret: &str) -> Result<(), ValidationError> {
        let response = self
            .send(secret, &self.probe_request())
            .await
            .map_err(|err| ValidationError::Unreachable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "API key probe rejected");
        Err(ValidationError::Rejected {
            status: status.as_u16(),
            message: error_summary_from_body(&body).unwrap_or_else(|| "Invalid API key".to_string()),
        })
    }
}
