//! Incremental decoder for the line-oriented event stream returned by
//! streaming chat completions.
//!
//! Network chunks do not line up with event lines, so the decoder keeps the
//! trailing partial line (as raw bytes, which also keeps split UTF-8
//! sequences intact) until the next chunk or the end of the body completes it.

use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};
use memchr::memchr;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{extract_error_summary, ChatResponse};
use crate::core::constants::{SSE_DATA_PREFIX, SSE_DONE_SENTINEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A non-empty fragment of assistant text.
    Delta { text: String },
    /// The API reported an error inside the stream body.
    Error { message: String },
    /// A data line that could not be decoded; the stream carries on.
    ParseError { raw: String },
    /// The body closed. Always the last event.
    End,
}

impl ProtocolEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        ProtocolEvent::Delta { text: text.into() }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the events for every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.finished || chunk.is_empty() {
            return events;
        }

        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = memchr(b'\n', &self.buffer[start..]) {
            let end = start + offset;
            if let Some(event) = decode_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        events
    }

    /// Flush whatever is left in the buffer and emit [`ProtocolEvent::End`].
    ///
    /// Calling it more than once yields nothing after the first call.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        let rest = std::mem::take(&mut self.buffer);
        if let Some(event) = decode_line(&rest) {
            events.push(event);
        }
        events.push(ProtocolEvent::End);
        events
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<ProtocolEvent>,
    done: bool,
}

/// Lazily turn a byte stream into protocol events.
///
/// Events are produced only as the consumer polls. A transport error is
/// yielded once and ends the sequence without an [`ProtocolEvent::End`].
pub fn decode_stream<S, B, E>(body: S) -> impl Stream<Item = Result<ProtocolEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(SSE_DATA_PREFIX).map(str::trim)
}

fn decode_line(raw: &[u8]) -> Option<ProtocolEvent> {
    let raw = match raw.last() {
        Some(b'\r') => &raw[..raw.len() - 1],
        _ => raw,
    };

    // Comments, keepalives and other fields are not ours to interpret.
    if !raw.starts_with(SSE_DATA_PREFIX.as_bytes()) {
        return None;
    }

    match std::str::from_utf8(raw) {
        Ok(line) => extract_data_payload(line).and_then(decode_payload),
        Err(err) => {
            warn!("Invalid UTF-8 in stream line: {err}");
            Some(ProtocolEvent::ParseError {
                raw: String::from_utf8_lossy(raw).into_owned(),
            })
        }
    }
}

fn decode_payload(payload: &str) -> Option<ProtocolEvent> {
    // The sentinel is informational; closing the body is what ends the stream.
    if payload.is_empty() || payload == SSE_DONE_SENTINEL {
        return None;
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            debug!("Failed to parse stream frame: {err} - Data: {payload}");
            return Some(ProtocolEvent::ParseError {
                raw: payload.to_string(),
            });
        }
    };

    if value.get("error").is_some_and(|error| !error.is_null()) {
        let message = extract_error_summary(&value)
            .unwrap_or_else(|| "The API reported an error while streaming".to_string());
        return Some(ProtocolEvent::Error { message });
    }

    match serde_json::from_value::<ChatResponse>(value) {
        Ok(response) => {
            let text = response.delta_text();
            (!text.is_empty()).then(|| ProtocolEvent::delta(text))
        }
        Err(err) => {
            debug!("Unexpected stream frame shape: {err} - Data: {payload}");
            Some(ProtocolEvent::ParseError {
                raw: payload.to_string(),
            })
        }
    }
}
