pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod utils;

use std::sync::Arc;

use config::Settings;
use services::chat_backend::BackendError;
use services::{ChatBackend, ConversationContextManager, HttpChatBackend, RequestDispatcher};
use state::AppState;

/// Wire the manager and dispatcher around one backend
pub fn build_state(settings: Settings, backend: Arc<dyn ChatBackend>) -> AppState {
    let conversation_manager = Arc::new(ConversationContextManager::new(
        backend.clone(),
        &settings.chat,
        settings.context.clone(),
    ));

    let dispatcher = Arc::new(RequestDispatcher::new(
        conversation_manager.clone(),
        backend,
        settings.chat.clone(),
    ));

    AppState {
        conversation_manager,
        dispatcher,
        settings: Arc::new(settings),
    }
}

/// State backed by the HTTP chat backend from `settings.backend`
pub fn build_http_state(settings: Settings) -> Result<AppState, BackendError> {
    let backend: Arc<dyn ChatBackend> = Arc::new(HttpChatBackend::new(settings.backend.clone())?);
    Ok(build_state(settings, backend))
}
