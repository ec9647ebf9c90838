use std::fmt;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::error_summary_from_body;
use crate::core::client::ApiClient;
use crate::core::message::Message;
use crate::core::sse::{decode_stream, ProtocolEvent};

/// Substrings that mark an error message as a credential problem.
const CREDENTIAL_ERROR_MARKERS: &[&str] = &[
    "api key",
    "api_key",
    "apikey",
    "unauthorized",
    "authorization",
    "authenticat",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The endpoint answered with a non-success status.
    Request { status: u16 },
    /// The connection failed before or while reading the body.
    Transport,
    /// The stream itself carried an error frame.
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// True when the caller should ask for a new API key.
    pub fn is_credential_error(&self) -> bool {
        if matches!(
            self.kind,
            FailureKind::Request {
                status: 401 | 403
            }
        ) {
            return true;
        }
        let lowered = self.message.to_ascii_lowercase();
        CREDENTIAL_ERROR_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// How a generation ended. Cancellation is a normal outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed(StreamFailure),
}

impl StreamOutcome {
    pub fn failure(&self) -> Option<&StreamFailure> {
        match self {
            StreamOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

fn transport_failure(err: reqwest::Error) -> StreamOutcome {
    StreamOutcome::Failed(StreamFailure::new(FailureKind::Transport, err.to_string()))
}

/// Run one generation request to completion.
///
/// `on_delta` is called synchronously for every text delta, in arrival
/// order. Once `cancel` fires no further deltas are delivered, even ones
/// already decoded from the current network read.
pub async fn stream_chat<F>(
    client: &ApiClient,
    api_key: &str,
    transcript: &[Message],
    cancel: &CancellationToken,
    mut on_delta: F,
) -> StreamOutcome
where
    F: FnMut(&str),
{
    let request = client.generation_request(transcript);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Request cancelled before response");
            return StreamOutcome::Cancelled;
        }
        result = client.send(api_key, &request) => match result {
            Ok(response) => response,
            Err(err) => return transport_failure(err),
        },
    };

    let status = response.status();
    if !status.is_success() {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            body = response.text() => body.unwrap_or_default(),
        };
        debug!(status = status.as_u16(), body = %body, "API error response");
        let message = error_summary_from_body(&body)
            .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()));
        return StreamOutcome::Failed(StreamFailure::new(
            FailureKind::Request {
                status: status.as_u16(),
            },
            message,
        ));
    }

    let mut events = std::pin::pin!(decode_stream(Box::pin(response.bytes_stream())));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stream cancelled");
                return StreamOutcome::Cancelled;
            }
            next = events.next() => next,
        };

        match next {
            Some(Ok(ProtocolEvent::Delta { text })) => {
                if cancel.is_cancelled() {
                    debug!("Stream cancelled");
                    return StreamOutcome::Cancelled;
                }
                on_delta(&text);
            }
            Some(Ok(ProtocolEvent::ParseError { raw })) => {
                warn!(frame = %raw, "Skipping malformed stream frame");
            }
            Some(Ok(ProtocolEvent::Error { message })) => {
                return StreamOutcome::Failed(StreamFailure::new(FailureKind::Stream, message));
            }
            Some(Ok(ProtocolEvent::End)) | None => return StreamOutcome::Completed,
            Some(Err(err)) => return transport_failure(err),
        }
    }
}

/// The live side of one generation.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    id: u64,
    cancel_token: CancellationToken,
}

impl GenerationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

/// Single slot holding the current generation, if any.
#[derive(Debug, Default)]
pub struct GenerationRegister {
    last_id: u64,
    active: Option<GenerationHandle>,
}

impl GenerationRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever is active and install a fresh generation.
    pub fn supersede(&mut self) -> GenerationHandle {
        if let Some(previous) = self.active.take() {
            debug!(id = previous.id, "Superseding generation");
            previous.cancel_token.cancel();
        }
        self.last_id += 1;
        let handle = GenerationHandle {
            id: self.last_id,
            cancel_token: CancellationToken::new(),
        };
        self.active = Some(handle.clone());
        handle
    }

    /// Cancel the active generation. Returns its id when there was one.
    pub fn cancel(&mut self) -> Option<u64> {
        let handle = self.active.take()?;
        handle.cancel_token.cancel();
        Some(handle.id)
    }

    /// Forget the active generation once it has ended on its own.
    pub fn release(&mut self, id: u64) -> bool {
        if self.is_current(id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.active.as_ref().is_some_and(|handle| handle.id == id)
    }

    pub fn active_id(&self) -> Option<u64> {
        self.active.as_ref().map(|handle| handle.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk(String),
    Finished(StreamOutcome),
}

pub struct StreamParams {
    pub client: ApiClient,
    pub api_key: String,
    pub transcript: Vec<Message>,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Runs generations on the runtime and reports back over a channel tagged
/// with the generation id.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                client,
                api_key,
                transcript,
                cancel_token,
                stream_id,
            } = params;

            let outcome = stream_chat(&client, &api_key, &transcript, &cancel_token, |text| {
                let _ = tx.send((StreamMessage::Chunk(text.to_string()), stream_id));
            })
            .await;
            let _ = tx.send((StreamMessage::Finished(outcome), stream_id));
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}
