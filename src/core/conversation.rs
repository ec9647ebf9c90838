//! The authoritative transcript and its transitions.
//!
//! At most one trailing assistant message is open for deltas. Every
//! operation that starts a generation supersedes the previous one through
//! the [`GenerationRegister`], and deltas are only applied when they carry
//! the id of the generation that owns the open slot.

use std::fmt;

use tracing::{debug, warn};

use crate::core::chat_stream::{GenerationHandle, GenerationRegister, StreamOutcome};
use crate::core::message::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    OutOfBounds { index: usize, len: usize },
    /// The slot is still receiving deltas.
    Open { index: usize },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::OutOfBounds { index, len } => {
                write!(f, "No message at index {index} (transcript has {len})")
            }
            IndexError::Open { index } => {
                write!(f, "Message {index} is still being generated")
            }
        }
    }
}

impl std::error::Error for IndexError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Finalized,
    Open,
}

/// Everything needed to start the generation a transition asked for.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub handle: GenerationHandle,
    /// Wire transcript, already stripped of empty assistant messages.
    pub transcript: Vec<Message>,
}

#[derive(Debug, Clone, Copy)]
struct OpenSlot {
    index: usize,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    open: Option<OpenSlot>,
    register: GenerationRegister,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_generating(&self) -> bool {
        self.open.is_some()
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.open.map(|slot| slot.generation)
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        if index >= self.messages.len() {
            return None;
        }
        match self.open {
            Some(slot) if slot.index == index => Some(SlotState::Open),
            _ => Some(SlotState::Finalized),
        }
    }

    /// The transcript as it goes on the wire.
    pub fn wire_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|message| !message.is_empty_assistant())
            .cloned()
            .collect()
    }

    /// Append a user turn and open a fresh assistant slot for its reply.
    ///
    /// An active generation is interrupted first: a reply that produced
    /// nothing is dropped, partial text is kept as a finalized message.
    pub fn append_user_turn(&mut self, content: impl Into<String>) -> GenerationRequest {
        self.interrupt();
        if self
            .messages
            .last()
            .is_some_and(Message::is_empty_assistant)
        {
            self.messages.pop();
        }

        self.messages.push(Message::user(content));
        self.open_reply()
    }

    /// Replace the content at `index`, discard everything after it and
    /// regenerate from there.
    pub fn edit_turn(
        &mut self,
        index: usize,
        content: impl Into<String>,
    ) -> Result<GenerationRequest, IndexError> {
        if index >= self.messages.len() {
            let err = IndexError::OutOfBounds {
                index,
                len: self.messages.len(),
            };
            warn!("Rejected edit: {err}");
            return Err(err);
        }
        if self.open.is_some_and(|slot| slot.index == index) {
            let err = IndexError::Open { index };
            warn!("Rejected edit: {err}");
            return Err(err);
        }

        self.interrupt();
        self.messages.truncate(index + 1);
        self.messages[index].content = content.into();
        Ok(self.open_reply())
    }

    /// Append `text` to the open message if `generation` still owns it.
    pub fn apply_delta(&mut self, generation: u64, text: &str) -> bool {
        match self.open {
            Some(slot) if slot.generation == generation && self.register.is_current(generation) => {
                self.messages[slot.index].content.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Finalize the open message once its generation has ended. Partial
    /// content is kept whatever the outcome.
    pub fn finish(&mut self, generation: u64, outcome: &StreamOutcome) -> bool {
        match self.open {
            Some(slot) if slot.generation == generation => {
                self.open = None;
                self.register.release(generation);
                debug!(
                    generation,
                    outcome = ?outcome,
                    chars = self.messages[slot.index].content.len(),
                    "Generation finished"
                );
                true
            }
            _ => {
                debug!(generation, "Ignoring finish from stale generation");
                false
            }
        }
    }

    /// Stop the active generation, keeping whatever text already arrived.
    pub fn cancel(&mut self) -> Option<u64> {
        let generation = self.register.cancel()?;
        if self.open.take().is_some() {
            debug!(generation, "Generation cancelled");
        }
        Some(generation)
    }

    /// Cancel the active generation ahead of a new one. An open reply with
    /// no content is removed; otherwise it becomes a finalized message.
    fn interrupt(&mut self) {
        self.register.cancel();
        if let Some(slot) = self.open.take() {
            if self.messages[slot.index].content.is_empty() {
                self.messages.remove(slot.index);
            }
            debug!(generation = slot.generation, "Generation superseded");
        }
    }

    fn open_reply(&mut self) -> GenerationRequest {
        let transcript = self.wire_messages();
        let handle = self.register.supersede();
        self.messages.push(Message::assistant(""));
        self.open = Some(OpenSlot {
            index: self.messages.len() - 1,
            generation: handle.id(),
        });
        GenerationRequest { handle, transcript }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::{FailureKind, StreamFailure};

    fn pairs(conversation: &Conversation) -> Vec<(&str, &str)> {
        conversation
            .messages()
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect()
    }

    fn seeded(transcript: &[(&str, &str)]) -> Conversation {
        let mut conversation = Conversation::new();
        for (user, reply) in transcript {
            let request = conversation.append_user_turn(*user);
            let id = request.handle.id();
            conversation.apply_delta(id, reply);
            conversation.finish(id, &StreamOutcome::Completed);
        }
        conversation
    }

    #[test]
    fn deltas_concatenate_in_arrival_order() {
        let mut conversation = Conversation::new();
        let request = conversation.append_user_turn("hi");
        let id = request.handle.id();

        for piece in ["He", "l", "", "lo", ", wörld"] {
            assert!(conversation.apply_delta(id, piece));
        }

        assert_eq!(conversation.slot_state(1), Some(SlotState::Open));
        assert_eq!(conversation.messages()[1].content, "Hello, wörld");
        assert!(conversation.finish(id, &StreamOutcome::Completed));
        assert_eq!(conversation.slot_state(1), Some(SlotState::Finalized));
        assert!(!conversation.is_generating());
    }

    #[test]
    fn wire_transcript_excludes_open_placeholder() {
        let mut conversation = seeded(&[("a", "x")]);
        let request = conversation.append_user_turn("b");

        assert!(request
            .transcript
            .iter()
            .all(|message| !message.is_empty_assistant()));
        assert_eq!(request.transcript.len(), 3);
        assert_eq!(request.transcript[2], Message::user("b"));
        assert_eq!(conversation.len(), 4);
    }

    #[test]
    fn supersession_drops_an_empty_open_reply() {
        let mut conversation = Conversation::new();
        let first = conversation.append_user_turn("a");
        assert_eq!(pairs(&conversation), vec![("user", "a"), ("assistant", "")]);

        let second = conversation.append_user_turn("b");

        assert!(first.handle.cancel_token().is_cancelled());
        assert_eq!(
            pairs(&conversation),
            vec![("user", "a"), ("user", "b"), ("assistant", "")]
        );
        assert_eq!(
            second.transcript,
            vec![Message::user("a"), Message::user("b")]
        );
        assert_eq!(conversation.slot_state(2), Some(SlotState::Open));
    }

    #[test]
    fn supersession_keeps_partial_reply_finalized() {
        let mut conversation = Conversation::new();
        let first = conversation.append_user_turn("a");
        conversation.apply_delta(first.handle.id(), "par");

        let second = conversation.append_user_turn("b");

        assert_eq!(
            pairs(&conversation),
            vec![
                ("user", "a"),
                ("assistant", "par"),
                ("user", "b"),
                ("assistant", "")
            ]
        );
        assert_eq!(conversation.slot_state(1), Some(SlotState::Finalized));
        assert_eq!(second.transcript.len(), 3);
    }

    #[test]
    fn superseded_generation_cannot_touch_the_transcript() {
        let mut conversation = Conversation::new();
        let first = conversation.append_user_turn("a");
        let second = conversation.append_user_turn("b");

        assert!(!conversation.apply_delta(first.handle.id(), "late"));
        assert!(!conversation.finish(first.handle.id(), &StreamOutcome::Cancelled));
        assert!(conversation.is_generating());

        assert!(conversation.apply_delta(second.handle.id(), "ok"));
        assert_eq!(conversation.messages().last().unwrap().content, "ok");
    }

    #[test]
    fn edit_truncates_and_reopens() {
        let mut conversation = seeded(&[("a", "x"), ("b", "y")]);
        assert_eq!(conversation.len(), 4);

        let request = conversation.edit_turn(0, "a2").unwrap();

        assert_eq!(
            pairs(&conversation),
            vec![("user", "a2"), ("assistant", "")]
        );
        assert_eq!(request.transcript, vec![Message::user("a2")]);
        assert_eq!(conversation.slot_state(1), Some(SlotState::Open));
    }

    #[test]
    fn edit_during_generation_supersedes_it() {
        let mut conversation = seeded(&[("a", "x")]);
        let running = conversation.append_user_turn("b");
        conversation.apply_delta(running.handle.id(), "partial");

        let request = conversation.edit_turn(2, "b2").unwrap();

        assert!(running.handle.cancel_token().is_cancelled());
        assert_ne!(request.handle.id(), running.handle.id());
        assert_eq!(
            pairs(&conversation),
            vec![
                ("user", "a"),
                ("assistant", "x"),
                ("user", "b2"),
                ("assistant", "")
            ]
        );
    }

    #[test]
    fn edit_rejects_bad_indices_without_side_effects() {
        let mut conversation = seeded(&[("a", "x")]);
        let running = conversation.append_user_turn("b");

        assert_eq!(
            conversation.edit_turn(9, "z").unwrap_err(),
            IndexError::OutOfBounds { index: 9, len: 4 }
        );
        assert_eq!(
            conversation.edit_turn(3, "z").unwrap_err(),
            IndexError::Open { index: 3 }
        );
        assert!(!running.handle.cancel_token().is_cancelled());
        assert!(conversation.apply_delta(running.handle.id(), "still live"));
    }

    #[test]
    fn cancellation_retains_partial_content() {
        let mut conversation = Conversation::new();
        let request = conversation.append_user_turn("hi");
        let id = request.handle.id();
        conversation.apply_delta(id, "He");
        conversation.apply_delta(id, "llo");

        assert_eq!(conversation.cancel(), Some(id));

        assert!(request.handle.cancel_token().is_cancelled());
        assert!(!conversation.is_generating());
        assert_eq!(conversation.messages()[1], Message::assistant("Hello"));
        assert!(!conversation.apply_delta(id, "!"));
        assert_eq!(conversation.cancel(), None);
    }

    #[test]
    fn failed_generation_keeps_partial_content() {
        let mut conversation = Conversation::new();
        let request = conversation.append_user_turn("hi");
        let id = request.handle.id();
        conversation.apply_delta(id, "partial");

        let outcome = StreamOutcome::Failed(StreamFailure::new(FailureKind::Transport, "reset"));
        assert!(conversation.finish(id, &outcome));
        assert_eq!(conversation.messages()[1].content, "partial");
    }

    #[test]
    fn empty_failed_reply_is_dropped_by_next_turn() {
        let mut conversation = Conversation::new();
        let request = conversation.append_user_turn("a");
        conversation.finish(
            request.handle.id(),
            &StreamOutcome::Failed(StreamFailure::new(
                FailureKind::Request { status: 500 },
                "HTTP error! status: 500",
            )),
        );
        assert_eq!(pairs(&conversation), vec![("user", "a"), ("assistant", "")]);

        conversation.append_user_turn("b");
        assert_eq!(
            pairs(&conversation),
            vec![("user", "a"), ("user", "b"), ("assistant", "")]
        );
    }
}
