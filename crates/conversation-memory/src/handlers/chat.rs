use crate::config::Settings;
use crate::models::chat::*;
use crate::services::chat_backend::BackendError;
use crate::services::conversation::{ConversationTrack, SummaryState};
use crate::services::dispatcher::{DispatchEvent, SendRequest};
use crate::services::{ConversationContextManager, RequestDispatcher};
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub track: Track,
    pub messages: Vec<Message>,
    pub context_summary: String,
    pub summary_state: SummaryState,
    /// Context that would be attached to the next request
    pub context: String,
    pub busy: bool,
}

impl ConversationView {
    fn new(state: ConversationTrack, context: String, busy: bool) -> Self {
        Self {
            track: state.track,
            messages: state.messages,
            context_summary: state.context_summary,
            summary_state: state.summary_state,
            context,
            busy,
        }
    }
}

pub async fn conversation_handler(
    State(dispatcher): State<Arc<RequestDispatcher>>,
    Path(track): Path<Track>,
) -> Json<ConversationView> {
    let manager = dispatcher.manager();
    Json(ConversationView::new(
        manager.snapshot(track),
        manager.get_context(track),
        dispatcher.is_busy(track),
    ))
}

pub async fn credentials_handler(
    State(manager): State<Arc<ConversationContextManager>>,
    State(settings): State<Arc<Settings>>,
    Json(request): Json<CredentialsRequest>,
) -> Result<StatusCode, ApiError> {
    let api_key = request.api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(ApiError::BadRequest("api_key must not be empty".to_string()));
    }

    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| settings.chat.model.clone());

    manager.set_credentials(api_key, model);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_message_handler(
    State(dispatcher): State<Arc<RequestDispatcher>>,
    Path(track): Path<Track>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let start_time = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    info!(
        "Chat request: track={}, request={}, message_len={}, pdfs={}",
        track,
        request_id,
        request.message.len(),
        request.pdf_ids.as_ref().map_or(0, Vec::len)
    );

    let events = dispatcher.send(SendRequest {
        track,
        message: request.message,
        pdf_ids: request.pdf_ids.unwrap_or_default(),
    })?;

    let stream = events.map(move |event| {
        let sse = match event {
            DispatchEvent::Delta {
                message_id,
                content,
            } => create_sse_event("delta", &DeltaInfo {
                message_id,
                content,
            }),
            DispatchEvent::Error { error, .. } => create_sse_event("error", &ErrorInfo {
                code: error_code(&error).to_string(),
                message: error.to_string(),
            }),
            DispatchEvent::Done {
                message_id,
                summary_refreshed,
                ..
            } => {
                let processing_time = start_time.elapsed().as_millis() as u64;
                info!("Chat {} completed in {}ms", request_id, processing_time);
                create_sse_event("done", &CompletionInfo {
                    message_id,
                    request_id: request_id.clone(),
                    summary_refreshed,
                    processing_time_ms: processing_time,
                })
            }
        };
        Ok(sse)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn error_code(error: &BackendError) -> &'static str {
    match error {
        BackendError::Transport(_) => "BACKEND_UNREACHABLE",
        BackendError::Status { .. } => "BACKEND_ERROR",
        BackendError::Stream(_) => "STREAM_ERROR",
    }
}

// Helper: Create SSE event
fn create_sse_event<T: serde::Serialize>(event_type: &str, data: &T) -> Event {
    Event::default()
        .event(event_type)
        .data(serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()))
}
