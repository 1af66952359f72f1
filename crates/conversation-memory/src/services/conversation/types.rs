use serde::Serialize;
use thiserror::Error;

use crate::models::chat::{Message, MessageId, Role, Track};

/// Summary lifecycle of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryState {
    #[default]
    Empty,
    RefreshRequested,
    /// Terminal: the equality trigger never fires again for this track
    Populated,
}

/// Complete conversation state for one track
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTrack {
    pub track: Track,

    /// Chronological, append-only
    pub messages: Vec<Message>,

    /// Condensed description of older history (empty until generated)
    pub context_summary: String,

    pub summary_state: SummaryState,
}

impl ConversationTrack {
    pub fn new(track: Track) -> Self {
        Self {
            track,
            messages: Vec::new(),
            context_summary: String::new(),
            summary_state: SummaryState::Empty,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last `n` messages (all of them if fewer)
    pub fn tail(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Trailing message if it is an assistant message
    pub fn trailing_assistant_mut(&mut self) -> Option<&mut Message> {
        self.messages
            .last_mut()
            .filter(|msg| msg.role == Role::Assistant)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConversationError {
    #[error("stream delta for message {message_id} on {track} track does not target the trailing assistant message")]
    OutOfOrderDelta { track: Track, message_id: MessageId },
}
