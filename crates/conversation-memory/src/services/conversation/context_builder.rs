use tracing::debug;

use crate::config::ContextConfig;
use crate::models::chat::Message;
use super::types::ConversationTrack;

const RECENT_CONTEXT_LABEL: &str = "Recent conversation context:";
const RECENT_MESSAGES_LABEL: &str = "Recent messages:";
const SUMMARY_LABEL: &str = "Previous conversation summary:";

pub const SUMMARY_INSTRUCTION: &str = "Summarize this conversation in 2-3 sentences, focusing on key topics, decisions, and context that would be helpful for continuing the conversation. Be concise but include important details.";

/// Decides which slice of a track's history goes upstream
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Role-tagged lines joined by newlines
    pub fn render(messages: &[Message]) -> String {
        messages
            .iter()
            .map(Message::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Context string for the next outgoing request.
    ///
    /// Below the threshold the last `recent_window` messages are sent verbatim.
    /// From the threshold on, the summary (if any) plus the last
    /// `summary_phase_window` messages.
    pub fn build_context(&self, state: &ConversationTrack) -> String {
        if state.is_empty() {
            return String::new();
        }

        if state.len() < self.config.summary_threshold {
            let recent = Self::render(state.tail(self.config.recent_window));
            debug!(
                "{} track below summary threshold ({} messages), sending recent window",
                state.track,
                state.len()
            );
            return format!("{}\n{}", RECENT_CONTEXT_LABEL, recent);
        }

        let recent = Self::render(state.tail(self.config.summary_phase_window));
        let summary = state.context_summary.as_str();

        match (summary.is_empty(), recent.is_empty()) {
            (false, false) => format!(
                "{} {}\n\n{}\n{}",
                SUMMARY_LABEL, summary, RECENT_MESSAGES_LABEL, recent
            ),
            (false, true) => format!("{} {}", SUMMARY_LABEL, summary),
            (true, false) => format!("{}\n{}", RECENT_CONTEXT_LABEL, recent),
            (true, true) => String::new(),
        }
    }

    /// Equality check, not `>=`: fires once per track
    pub fn should_refresh(&self, message_count: usize) -> bool {
        message_count == self.config.summary_threshold
    }

    /// Rendered history to summarize, or None when too short to be worth a request
    pub fn summary_source(&self, state: &ConversationTrack) -> Option<String> {
        if state.is_empty() {
            return None;
        }

        let text = Self::render(state.tail(self.config.summary_source_window));
        // measured in UTF-16 code units
        if text.encode_utf16().count() < self.config.min_summary_source_chars {
            return None;
        }

        Some(text)
    }

    pub fn summary_prompt(source: &str) -> String {
        format!("Please summarize this recent conversation:\n\n{}", source)
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{Role, Track};

    fn track_with(n: usize) -> ConversationTrack {
        let mut state = ConversationTrack::new(Track::General);
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            state
                .messages
                .push(Message::new(i as u64, role, format!("msg {}", i), Track::General, None));
        }
        state
    }

    #[test]
    fn test_empty_track_has_no_context() {
        let builder = ContextBuilder::default();
        assert_eq!(builder.build_context(&track_with(0)), "");
    }

    #[test]
    fn test_short_history_sends_everything() {
        let builder = ContextBuilder::default();
        let context = builder.build_context(&track_with(3));
        assert_eq!(
            context,
            "Recent conversation context:\nUSER: msg 0\nASSISTANT: msg 1\nUSER: msg 2"
        );
    }

    #[test]
    fn test_below_threshold_uses_last_ten_and_ignores_summary() {
        let builder = ContextBuilder::default();
        let mut state = track_with(24);
        state.context_summary = "should not appear".to_string();

        let context = builder.build_context(&state);
        let lines: Vec<&str> = context.lines().collect();

        assert_eq!(lines[0], "Recent conversation context:");
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[1], "USER: msg 14");
        assert_eq!(lines[10], "ASSISTANT: msg 23");
        assert!(!context.contains("should not appear"));
    }

    #[test]
    fn test_at_threshold_combines_summary_and_last_five() {
        let builder = ContextBuilder::default();
        let mut state = track_with(25);
        state.context_summary = "Discussed X and Y.".to_string();

        let context = builder.build_context(&state);
        assert_eq!(
            context,
            "Previous conversation summary: Discussed X and Y.\n\nRecent messages:\n\
             USER: msg 20\nASSISTANT: msg 21\nUSER: msg 22\nASSISTANT: msg 23\nUSER: msg 24"
        );
    }

    #[test]
    fn test_at_threshold_without_summary_falls_back_to_last_five() {
        let builder = ContextBuilder::default();
        let context = builder.build_context(&track_with(30));
        let lines: Vec<&str> = context.lines().collect();

        assert_eq!(lines[0], "Recent conversation context:");
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "ASSISTANT: msg 25");
    }

    #[test]
    fn test_refresh_trigger_is_exact() {
        let builder = ContextBuilder::default();
        assert!(!builder.should_refresh(24));
        assert!(builder.should_refresh(25));
        assert!(!builder.should_refresh(26));
        assert!(!builder.should_refresh(30));
    }

    #[test]
    fn test_summary_source_requires_minimum_length() {
        let builder = ContextBuilder::default();
        assert!(builder.summary_source(&track_with(2)).is_none());

        let source = builder.summary_source(&track_with(25)).unwrap();
        // last 20 of 25
        assert!(source.starts_with("ASSISTANT: msg 5\n"));
        assert!(source.ends_with("USER: msg 24"));
    }

    #[test]
    fn test_summary_source_length_counts_utf16_units() {
        let builder = ContextBuilder::default();
        let single = |content: String| {
            let mut state = ConversationTrack::new(Track::General);
            state
                .messages
                .push(Message::new(0, Role::User, content, Track::General, None));
            state
        };

        // "USER: " plus two units per emoji
        assert!(builder.summary_source(&single("😀".repeat(46))).is_none());
        assert!(builder.summary_source(&single("😀".repeat(47))).is_some());
    }
}
