use std::sync::Arc;
use axum::extract::FromRef;

use crate::config::Settings;
use crate::services::{ConversationContextManager, RequestDispatcher};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub conversation_manager: Arc<ConversationContextManager>,
    pub dispatcher: Arc<RequestDispatcher>,
    pub settings: Arc<Settings>,
}

impl FromRef<AppState> for Arc<ConversationContextManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Arc<RequestDispatcher> {
    fn from_ref(state: &AppState) -> Self {
        state.dispatcher.clone()
    }
}

impl FromRef<AppState> for Arc<Settings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}
