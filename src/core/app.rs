//! Session facade used by the presentation layer.
//!
//! `App` owns the credential store, the conversation and the background
//! stream service. Intents come in as method calls; stream progress comes
//! back over the receiver returned from [`App::new`] and is applied with
//! [`App::handle_stream_message`]. Everything here runs on one task, so the
//! transcript has a single writer.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::chat_stream::{ChatStreamService, StreamMessage, StreamOutcome, StreamParams};
use crate::core::client::ApiClient;
use crate::core::conversation::{Conversation, GenerationRequest, IndexError};
use crate::core::credential::{CredentialStorageError, CredentialStore, ValidationError};
use crate::core::message::Message;

/// What applying a stream message changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The message belonged to a superseded generation.
    Ignored,
    Delta(String),
    Finished {
        outcome: StreamOutcome,
        /// The credential was discarded and settings reopened.
        credential_reset: bool,
    },
}

pub struct App {
    credentials: CredentialStore,
    conversation: Conversation,
    client: ApiClient,
    streams: ChatStreamService,
    settings_open: bool,
    credential_error: Option<String>,
    is_validating: bool,
}

impl App {
    pub fn new(
        client: ApiClient,
        credentials: CredentialStore,
    ) -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (streams, rx) = ChatStreamService::new();
        let settings_open = !credentials.is_configured();
        let app = Self {
            credentials,
            conversation: Conversation::new(),
            client,
            streams,
            settings_open,
            credential_error: None,
            is_validating: false,
        };
        (app, rx)
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn is_generating(&self) -> bool {
        self.conversation.is_generating()
    }

    pub fn has_credential(&self) -> bool {
        self.credentials.is_configured()
    }

    /// Whether the composer should accept a new turn right now.
    pub fn input_enabled(&self) -> bool {
        self.has_credential() && !self.is_generating()
    }

    pub fn settings_open(&self) -> bool {
        self.settings_open
    }

    pub fn credential_error(&self) -> Option<&str> {
        self.credential_error.as_deref()
    }

    pub fn is_validating(&self) -> bool {
        self.is_validating
    }

    /// Send a user turn. Blank input, or input without a credential, is
    /// ignored. Sending while a reply streams interrupts it.
    pub fn send(&mut self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() || !self.has_credential() {
            return false;
        }
        let request = self.conversation.append_user_turn(content);
        self.spawn_generation(request);
        true
    }

    /// Rewrite the message at `index` and regenerate from it.
    pub fn edit(&mut self, index: usize, content: &str) -> Result<bool, IndexError> {
        let content = content.trim();
        if content.is_empty() || !self.has_credential() {
            return Ok(false);
        }
        let request = self.conversation.edit_turn(index, content)?;
        self.spawn_generation(request);
        Ok(true)
    }

    pub fn cancel(&mut self) -> bool {
        self.conversation.cancel().is_some()
    }

    pub fn open_settings(&mut self) {
        self.settings_open = true;
    }

    /// Settings cannot be dismissed until a credential exists.
    pub fn close_settings(&mut self) -> bool {
        if self.has_credential() {
            self.settings_open = false;
            true
        } else {
            false
        }
    }

    /// Validate and store a new API key. Returns `Ok(false)` for blank input.
    pub async fn submit_credential(&mut self, secret: &str) -> Result<bool, ValidationError> {
        if secret.trim().is_empty() {
            return Ok(false);
        }

        self.credential_error = None;
        self.is_validating = true;
        let result = self.credentials.set(secret, &self.client).await;
        self.is_validating = false;

        match result {
            Ok(()) => {
                self.settings_open = false;
                Ok(true)
            }
            Err(err) => {
                self.credential_error = Some(err.to_string());
                self.settings_open = true;
                Err(err)
            }
        }
    }

    pub fn clear_credential(&mut self) -> Result<(), CredentialStorageError> {
        let result = self.credentials.clear();
        self.credential_error = None;
        self.settings_open = true;
        result
    }

    pub fn handle_stream_message(&mut self, message: StreamMessage, stream_id: u64) -> StreamUpdate {
        match message {
            StreamMessage::Chunk(text) => {
                if self.conversation.apply_delta(stream_id, &text) {
                    StreamUpdate::Delta(text)
                } else {
                    StreamUpdate::Ignored
                }
            }
            StreamMessage::Finished(outcome) => {
                if !self.conversation.finish(stream_id, &outcome) {
                    return StreamUpdate::Ignored;
                }
                let credential_reset = match outcome.failure() {
                    Some(failure) => {
                        warn!(kind = ?failure.kind, "Generation failed: {failure}");
                        failure.is_credential_error() && self.reset_credential(&failure.message)
                    }
                    None => false,
                };
                StreamUpdate::Finished {
                    outcome,
                    credential_reset,
                }
            }
        }
    }

    /// The in-memory key is always dropped. A storage failure is appended
    /// to the error shown in settings.
    fn reset_credential(&mut self, message: &str) -> bool {
        info!("API key rejected during generation; reopening settings");
        let error = match self.credentials.clear() {
            Ok(()) => message.to_string(),
            Err(err) => {
                warn!("Failed to remove rejected API key from storage: {err}");
                format!("{message} (stored key could not be removed: {err})")
            }
        };
        self.credential_error = Some(error);
        self.settings_open = true;
        !self.credentials.is_configured()
    }

    fn spawn_generation(&mut self, request: GenerationRequest) {
        let Some(api_key) = self.credentials.get() else {
            return;
        };
        let GenerationRequest { handle, transcript } = request;
        self.streams.spawn_stream(StreamParams {
            client: self.client.clone(),
            api_key: api_key.to_string(),
            transcript,
            cancel_token: handle.cancel_token().clone(),
            stream_id: handle.id(),
        });
    }
}
