use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, ContextConfig};
use crate::models::chat::{ChatRequest, Message, MessageId, Role, Track};
use crate::services::chat_backend::{collect_text, ChatBackend};

use super::context_builder::{ContextBuilder, SUMMARY_INSTRUCTION};
use super::store::{StoreStats, TrackStore};
use super::types::{ConversationError, ConversationTrack, SummaryState};

/// Session credential collected from the user
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub model: String,
}

/// Owns both conversation tracks and decides what history goes upstream
pub struct ConversationContextManager {
    store: TrackStore,
    context_builder: ContextBuilder,
    backend: Arc<dyn ChatBackend>,
    credentials: RwLock<Option<Credentials>>,
    summary_model: String,
}

impl ConversationContextManager {
    pub fn new(backend: Arc<dyn ChatBackend>, chat: &ChatConfig, context: ContextConfig) -> Self {
        let credentials = chat.api_key.clone().map(|api_key| Credentials {
            api_key,
            model: chat.model.clone(),
        });

        info!(
            "Conversation manager ready (threshold={}, recent_window={}, credentials={})",
            context.summary_threshold,
            context.recent_window,
            credentials.is_some()
        );

        Self {
            store: TrackStore::new(),
            context_builder: ContextBuilder::new(context),
            backend,
            credentials: RwLock::new(credentials),
            summary_model: chat.summary_model.clone(),
        }
    }

    pub fn context_config(&self) -> &ContextConfig {
        self.context_builder.config()
    }

    // ===== CREDENTIALS =====

    pub fn set_credentials(&self, api_key: String, model: String) {
        info!("Credentials updated (model={})", model);
        *self.credentials.write() = Some(Credentials { api_key, model });
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.read().is_some()
    }

    // ===== CONTEXT =====

    /// Context string to attach to the next request on `track`
    pub fn get_context(&self, track: Track) -> String {
        self.store
            .read(track, |state| self.context_builder.build_context(state))
    }

    /// True only while the message count equals the threshold
    pub fn should_refresh_summary(&self, track: Track) -> bool {
        let count = self.message_count(track);
        self.context_builder.should_refresh(count)
    }

    /// Ask the backend for a summary of recent history.
    ///
    /// Returns the proposed summary, or an empty string when there is nothing
    /// worth summarizing or the request failed. Never touches track state.
    pub async fn refresh_summary(&self, track: Track) -> String {
        let Some(credentials) = self.credentials() else {
            debug!("No credentials, skipping summary for {} track", track);
            return String::new();
        };

        let Some(source) = self
            .store
            .read(track, |state| self.context_builder.summary_source(state))
        else {
            debug!("History on {} track too short to summarize", track);
            return String::new();
        };

        let request = ChatRequest {
            developer_message: Some(SUMMARY_INSTRUCTION.to_string()),
            user_message: ContextBuilder::summary_prompt(&source),
            model: self.summary_model.clone(),
            api_key: credentials.api_key,
            context_summary: None,
        };

        let result = match self.backend.chat_stream(request).await {
            Ok(stream) => collect_text(stream).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => {
                let summary = text.trim().to_string();
                if summary.is_empty() {
                    warn!("Summary request for {} track returned an empty body", track);
                } else {
                    debug!("Summary for {} track: {} chars", track, summary.len());
                }
                summary
            }
            Err(e) => {
                warn!("Failed to create conversation summary for {} track: {}", track, e);
                String::new()
            }
        }
    }

    /// Store a proposed summary. Empty proposals are discarded.
    pub fn commit_summary(&self, track: Track, summary: &str) -> bool {
        let summary = summary.trim();

        self.store.update(track, |state| {
            if summary.is_empty() {
                if state.summary_state == SummaryState::RefreshRequested {
                    state.summary_state = if state.context_summary.is_empty() {
                        SummaryState::Empty
                    } else {
                        SummaryState::Populated
                    };
                }
                return false;
            }

            state.context_summary = summary.to_string();
            state.summary_state = SummaryState::Populated;
            true
        })
    }

    /// Run one refresh cycle: mark requested, ask the backend, commit the result
    pub async fn refresh_and_commit(&self, track: Track) -> bool {
        self.store.update(track, |state| {
            state.summary_state = SummaryState::RefreshRequested;
        });

        let summary = self.refresh_summary(track).await;
        let committed = self.commit_summary(track, &summary);

        if committed {
            info!("Context summary updated for {} track", track);
        }
        committed
    }

    // ===== MESSAGE LOG =====

    /// Append a message; the only way messages enter a track
    pub fn record_message(
        &self,
        track: Track,
        role: Role,
        content: impl Into<String>,
        document_refs: Option<Vec<String>>,
    ) -> MessageId {
        let id = self.store.next_message_id();
        let message = Message::new(id, role, content, track, document_refs);

        self.store.update(track, |state| state.messages.push(message));
        id
    }

    /// Replace the content of the trailing assistant message
    pub fn apply_stream_delta(
        &self,
        track: Track,
        message_id: MessageId,
        new_full_content: &str,
    ) -> Result<(), ConversationError> {
        self.store.update(track, |state| match state.trailing_assistant_mut() {
            Some(msg) if msg.id == message_id => {
                msg.content.clear();
                msg.content.push_str(new_full_content);
                Ok(())
            }
            _ => Err(ConversationError::OutOfOrderDelta { track, message_id }),
        })
    }

    // ===== READS =====

    pub fn message_count(&self, track: Track) -> usize {
        self.store.read(track, ConversationTrack::len)
    }

    pub fn context_summary(&self, track: Track) -> String {
        self.store.read(track, |state| state.context_summary.clone())
    }

    pub fn summary_state(&self, track: Track) -> SummaryState {
        self.store.read(track, |state| state.summary_state)
    }

    pub fn snapshot(&self, track: Track) -> ConversationTrack {
        self.store.snapshot(track)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat_backend::{BackendError, MockChatBackend, TextStream};

    fn text_stream(chunks: &[&str]) -> TextStream {
        let items: Vec<Result<String, BackendError>> =
            chunks.iter().map(|c| Ok(c.to_string())).collect();
        Box::pin(futures::stream::iter(items))
    }

    fn chat_config() -> ChatConfig {
        ChatConfig {
            api_key: Some("sk-test".to_string()),
            ..ChatConfig::default()
        }
    }

    fn manager_with(backend: MockChatBackend) -> ConversationContextManager {
        ConversationContextManager::new(Arc::new(backend), &chat_config(), ContextConfig::default())
    }

    fn fill(manager: &ConversationContextManager, track: Track, n: usize) {
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            manager.record_message(
                track,
                role,
                format!("turn {} about the quarterly budget review", i),
                None,
            );
        }
    }

    #[test]
    fn test_empty_track_context() {
        let manager = manager_with(MockChatBackend::new());
        assert_eq!(manager.get_context(Track::General), "");
        assert_eq!(manager.get_context(Track::Document), "");
    }

    #[test]
    fn test_phase_boundary_changes_shape() {
        let manager = manager_with(MockChatBackend::new());
        fill(&manager, Track::General, 24);
        let before = manager.get_context(Track::General);
        assert!(before.starts_with("Recent conversation context:\n"));
        assert_eq!(before.lines().count(), 11);

        manager.commit_summary(Track::General, "Budget talk.");
        fill(&manager, Track::General, 1);
        let after = manager.get_context(Track::General);
        assert!(after.starts_with("Previous conversation summary: Budget talk.\n\nRecent messages:\n"));
        assert_eq!(after.lines().filter(|l| l.starts_with("USER") || l.starts_with("ASSISTANT")).count(), 5);
    }

    #[test]
    fn test_refresh_trigger_fires_once() {
        let manager = manager_with(MockChatBackend::new());
        fill(&manager, Track::General, 24);
        assert!(!manager.should_refresh_summary(Track::General));

        fill(&manager, Track::General, 1);
        assert!(manager.should_refresh_summary(Track::General));

        fill(&manager, Track::General, 1);
        assert!(!manager.should_refresh_summary(Track::General));
        fill(&manager, Track::General, 4);
        assert!(!manager.should_refresh_summary(Track::General));
    }

    #[test]
    fn test_tracks_are_isolated() {
        let manager = manager_with(MockChatBackend::new());
        fill(&manager, Track::General, 3);
        let general = manager.get_context(Track::General);

        fill(&manager, Track::Document, 7);
        manager.commit_summary(Track::Document, "Paper comparison.");
        assert_eq!(manager.get_context(Track::General), general);
        assert_eq!(manager.context_summary(Track::General), "");

        let document = manager.get_context(Track::Document);
        fill(&manager, Track::General, 2);
        manager.commit_summary(Track::General, "Small talk.");
        assert_eq!(manager.get_context(Track::Document), document);
        assert_eq!(manager.context_summary(Track::Document), "Paper comparison.");
        assert_eq!(manager.message_count(Track::Document), 7);
    }

    #[test]
    fn test_stream_deltas_accumulate() {
        let manager = manager_with(MockChatBackend::new());
        manager.record_message(Track::General, Role::User, "greet me", None);
        let id = manager.record_message(Track::General, Role::Assistant, "", None);

        let mut acc = String::new();
        for (chunk, expected) in [("Hel", "Hel"), ("lo", "Hello"), (" world", "Hello world")] {
            acc.push_str(chunk);
            manager.apply_stream_delta(Track::General, id, &acc).unwrap();
            let snapshot = manager.snapshot(Track::General);
            assert_eq!(snapshot.messages.last().unwrap().content, expected);
        }
    }

    #[test]
    fn test_stream_delta_rejects_non_trailing_target() {
        let manager = manager_with(MockChatBackend::new());
        let stale = manager.record_message(Track::General, Role::Assistant, "old", None);
        manager.record_message(Track::General, Role::User, "next", None);

        let err = manager
            .apply_stream_delta(Track::General, stale, "overwritten")
            .unwrap_err();
        assert_eq!(
            err,
            ConversationError::OutOfOrderDelta {
                track: Track::General,
                message_id: stale
            }
        );
        assert_eq!(manager.snapshot(Track::General).messages[0].content, "old");

        // same id on the other track is not found either
        assert!(manager.apply_stream_delta(Track::Document, stale, "x").is_err());
    }

    #[test]
    fn test_recorded_message_keeps_mode_and_refs() {
        let manager = manager_with(MockChatBackend::new());
        let refs = vec!["pdf-1".to_string()];
        manager.record_message(Track::Document, Role::User, "q", Some(refs.clone()));
        let msg = &manager.snapshot(Track::Document).messages[0];
        assert_eq!(msg.mode, Track::Document);
        assert_eq!(msg.document_refs.as_ref(), Some(&refs));
    }

    #[tokio::test]
    async fn test_refresh_summary_sends_last_twenty() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat_stream()
            .withf(|req| {
                req.developer_message.as_deref() == Some(SUMMARY_INSTRUCTION)
                    && req.user_message.starts_with("Please summarize this recent conversation:\n\nASSISTANT: turn 5 ")
                    && req.user_message.lines().count() == 22
                    && req.api_key == "sk-test"
                    && req.model == "gpt-4o-mini"
            })
            .times(1)
            .returning(|_| Ok(text_stream(&["  Discussed X ", "and Y.\n"])));

        let manager = manager_with(backend);
        fill(&manager, Track::General, 25);

        let summary = manager.refresh_summary(Track::General).await;
        assert_eq!(summary, "Discussed X and Y.");
        // proposing does not commit
        assert_eq!(manager.context_summary(Track::General), "");
    }

    #[tokio::test]
    async fn test_refresh_summary_skips_without_credentials() {
        let mut backend = MockChatBackend::new();
        backend.expect_chat_stream().times(0);

        let manager = ConversationContextManager::new(
            Arc::new(backend),
            &ChatConfig::default(),
            ContextConfig::default(),
        );
        fill(&manager, Track::General, 25);
        assert_eq!(manager.refresh_summary(Track::General).await, "");
    }

    #[tokio::test]
    async fn test_refresh_summary_skips_short_history() {
        let mut backend = MockChatBackend::new();
        backend.expect_chat_stream().times(0);

        let manager = manager_with(backend);
        manager.record_message(Track::General, Role::User, "hi", None);
        assert_eq!(manager.refresh_summary(Track::General).await, "");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_existing_summary() {
        let mut backend = MockChatBackend::new();
        backend.expect_chat_stream().returning(|_| {
            Err(BackendError::Status {
                status: 500,
                message: "boom".to_string(),
            })
        });

        let manager = manager_with(backend);
        fill(&manager, Track::General, 25);
        manager.commit_summary(Track::General, "Earlier summary.");

        assert!(!manager.refresh_and_commit(Track::General).await);
        assert_eq!(manager.context_summary(Track::General), "Earlier summary.");
        assert_eq!(manager.summary_state(Track::General), SummaryState::Populated);
    }

    #[tokio::test]
    async fn test_failed_first_refresh_returns_to_empty() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat_stream()
            .returning(|_| Ok(text_stream(&["   "])));

        let manager = manager_with(backend);
        fill(&manager, Track::Document, 25);

        assert!(!manager.refresh_and_commit(Track::Document).await);
        assert_eq!(manager.summary_state(Track::Document), SummaryState::Empty);
        assert_eq!(manager.context_summary(Track::Document), "");
    }

    #[tokio::test]
    async fn test_end_to_end_summary_lifecycle() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat_stream()
            .times(1)
            .returning(|_| Ok(text_stream(&["Discussed X and Y."])));

        let manager = manager_with(backend);
        fill(&manager, Track::General, 24);

        let context = manager.get_context(Track::General);
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines[0], "Recent conversation context:");
        assert_eq!(lines.len(), 11);
        assert!(lines[1].starts_with("USER: turn 14"));
        assert!(lines[10].starts_with("ASSISTANT: turn 23"));

        manager.record_message(
            Track::General,
            Role::User,
            "turn 24 about the quarterly budget review",
            None,
        );
        assert!(manager.should_refresh_summary(Track::General));
        assert!(manager.refresh_and_commit(Track::General).await);
        assert_eq!(manager.context_summary(Track::General), "Discussed X and Y.");
        assert_eq!(manager.summary_state(Track::General), SummaryState::Populated);

        let context = manager.get_context(Track::General);
        assert!(context.starts_with("Previous conversation summary: Discussed X and Y.\n\nRecent messages:\n"));
        assert!(context.ends_with("USER: turn 24 about the quarterly budget review"));
        assert!(context.contains("USER: turn 20 "));
        assert!(!context.contains("turn 19 "));
    }
}
