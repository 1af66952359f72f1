//! Conversation memory management module
//!
//! Provides in-memory conversation state for the general and document tracks:
//! - Track storage (DashMap)
//! - Context-window policy (recent window vs summary + short window)
//! - Summary lifecycle against the chat backend

mod context_builder;
pub mod manager;
mod store;
pub mod types;

pub use context_builder::{ContextBuilder, SUMMARY_INSTRUCTION};
pub use manager::{ConversationContextManager, Credentials};
pub use store::{StoreStats, TrackStats, TrackStore};
pub use types::{ConversationError, ConversationTrack, SummaryState};

pub use crate::models::chat::{Message, MessageId, Role, Track};
