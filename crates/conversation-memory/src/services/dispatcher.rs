use dashmap::DashSet;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::models::chat::{ChatRequest, DocumentChatRequest, MessageId, Role, Track};
use crate::services::chat_backend::{BackendError, ChatBackend, TextStream};
use crate::services::conversation::ConversationContextManager;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Please enter your OpenAI API key first")]
    MissingCredentials,

    #[error("Please select at least one PDF for analysis")]
    MissingDocuments,

    #[error("At most {max} PDFs can be selected (got {got})")]
    TooManyDocuments { max: usize, got: usize },

    #[error("A request is already in progress on the {0} track")]
    Busy(Track),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub track: Track,
    pub message: String,
    /// Only used on the document track
    pub pdf_ids: Vec<String>,
}

impl SendRequest {
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            track: Track::General,
            message: message.into(),
            pdf_ids: Vec::new(),
        }
    }

    pub fn document(message: impl Into<String>, pdf_ids: Vec<String>) -> Self {
        Self {
            track: Track::Document,
            message: message.into(),
            pdf_ids,
        }
    }
}

/// Progress of one send
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Cumulative assistant text after a chunk arrived
    Delta { message_id: MessageId, content: String },
    /// Send failed; the partial assistant message is kept as streamed
    Error { message_id: MessageId, error: BackendError },
    Done {
        message_id: MessageId,
        content: String,
        summary_refreshed: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub message_id: MessageId,
    pub content: String,
    pub summary_refreshed: bool,
}

pub type DispatchStream = Pin<Box<dyn Stream<Item = DispatchEvent> + Send>>;

const EVENT_BUFFER: usize = 64;

enum Outbound {
    General(ChatRequest),
    Document(DocumentChatRequest),
}

struct Turn {
    track: Track,
    message_id: MessageId,
    outbound: Outbound,
    refresh_due: bool,
}

/// Marks a track busy until dropped
struct InFlightGuard {
    in_flight: Arc<DashSet<Track>>,
    track: Track,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<DashSet<Track>>, track: Track) -> Option<Self> {
        if !in_flight.insert(track) {
            return None;
        }
        Some(Self {
            in_flight: in_flight.clone(),
            track,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.track);
        debug!("Released {} track", self.track);
    }
}

/// Sends user messages upstream and streams replies into the track log
pub struct RequestDispatcher {
    manager: Arc<ConversationContextManager>,
    backend: Arc<dyn ChatBackend>,
    chat: ChatConfig,
    in_flight: Arc<DashSet<Track>>,
}

impl RequestDispatcher {
    pub fn new(
        manager: Arc<ConversationContextManager>,
        backend: Arc<dyn ChatBackend>,
        chat: ChatConfig,
    ) -> Self {
        Self {
            manager,
            backend,
            chat,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ConversationContextManager> {
        &self.manager
    }

    pub fn is_busy(&self, track: Track) -> bool {
        self.in_flight.contains(&track)
    }

    /// Start a send. Validation errors are returned before anything is recorded;
    /// everything after that is reported through the event stream. Dropping the
    /// stream stops delivery, not the turn.
    pub fn send(self: &Arc<Self>, request: SendRequest) -> Result<DispatchStream, DispatchError> {
        let SendRequest {
            track,
            message,
            pdf_ids,
        } = request;

        let message = message.trim().to_string();
        if message.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }

        let credentials = self
            .manager
            .credentials()
            .ok_or(DispatchError::MissingCredentials)?;

        let document_refs = match track {
            Track::General => None,
            Track::Document => {
                let max = self.manager.context_config().max_document_refs;
                if pdf_ids.is_empty() {
                    return Err(DispatchError::MissingDocuments);
                }
                if pdf_ids.len() > max {
                    return Err(DispatchError::TooManyDocuments {
                        max,
                        got: pdf_ids.len(),
                    });
                }
                Some(pdf_ids)
            }
        };

        let guard =
            InFlightGuard::acquire(&self.in_flight, track).ok_or(DispatchError::Busy(track))?;

        // History as it stood before this turn
        let context = self.manager.get_context(track);

        self.manager
            .record_message(track, Role::User, message.clone(), document_refs.clone());
        let mut refresh_due = self.manager.should_refresh_summary(track);

        let message_id =
            self.manager
                .record_message(track, Role::Assistant, String::new(), document_refs.clone());
        refresh_due |= self.manager.should_refresh_summary(track);

        info!(
            "Dispatching {} message ({} chars, context {} chars)",
            track,
            message.len(),
            context.len()
        );

        let outbound = match document_refs {
            None => Outbound::General(ChatRequest {
                developer_message: self.developer_message(&context),
                user_message: message,
                model: credentials.model,
                api_key: credentials.api_key,
                context_summary: None,
            }),
            Some(pdf_ids) => Outbound::Document(DocumentChatRequest {
                user_message: message,
                pdf_ids,
                model: credentials.model,
                api_key: credentials.api_key,
                context_summary: (!context.is_empty()).then_some(context),
            }),
        };

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(self.clone().drive(
            Turn {
                track,
                message_id,
                outbound,
                refresh_due,
            },
            guard,
            tx,
        ));

        let stream = async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    /// Runs a turn to completion whether or not anyone is still listening.
    /// The track stays busy until the reply and any summary refresh are recorded.
    async fn drive(
        self: Arc<Self>,
        turn: Turn,
        guard: InFlightGuard,
        tx: mpsc::Sender<DispatchEvent>,
    ) {
        let Turn {
            track,
            message_id,
            outbound,
            mut refresh_due,
        } = turn;

        let reply = self.stream_reply(track, message_id, outbound, &tx).await;

        refresh_due |= self.manager.should_refresh_summary(track);
        let summary_refreshed = refresh_due && self.manager.refresh_and_commit(track).await;
        drop(guard);

        let last = match reply {
            Ok(content) => {
                debug!("{} track reply complete ({} chars)", track, content.len());
                DispatchEvent::Done {
                    message_id,
                    content,
                    summary_refreshed,
                }
            }
            Err(error) => DispatchEvent::Error { message_id, error },
        };

        if tx.send(last).await.is_err() {
            debug!("{} track listener left before completion", track);
        }
    }

    async fn stream_reply(
        &self,
        track: Track,
        message_id: MessageId,
        outbound: Outbound,
        tx: &mpsc::Sender<DispatchEvent>,
    ) -> Result<String, BackendError> {
        let opened = match outbound {
            Outbound::General(req) => self.backend.chat_stream(req).await,
            Outbound::Document(req) => self.backend.document_chat_stream(req).await,
        };

        let mut upstream: TextStream = opened.map_err(|error| {
            warn!("Chat request on {} track failed: {}", track, error);
            error
        })?;

        let mut accumulated = String::new();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(text) => {
                    accumulated.push_str(&text);
                    if let Err(e) = self.manager.apply_stream_delta(track, message_id, &accumulated) {
                        warn!("{}", e);
                    }
                    // a closed receiver only means nobody is watching
                    let _ = tx
                        .send(DispatchEvent::Delta {
                            message_id,
                            content: accumulated.clone(),
                        })
                        .await;
                }
                Err(error) => {
                    warn!(
                        "Stream on {} track broke after {} chars: {}",
                        track,
                        accumulated.len(),
                        error
                    );
                    return Err(error);
                }
            }
        }

        Ok(accumulated)
    }

    /// Send and wait for the full reply
    pub async fn send_and_collect(
        self: &Arc<Self>,
        request: SendRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut events = self.send(request)?;

        while let Some(event) = events.next().await {
            match event {
                DispatchEvent::Delta { .. } => {}
                DispatchEvent::Error { error, .. } => return Err(error.into()),
                DispatchEvent::Done {
                    message_id,
                    content,
                    summary_refreshed,
                } => {
                    return Ok(DispatchOutcome {
                        message_id,
                        content,
                        summary_refreshed,
                    })
                }
            }
        }

        Err(DispatchError::Backend(BackendError::Stream(
            "stream ended without completion".to_string(),
        )))
    }

    /// Developer message for general chat, with history injected when present
    fn developer_message(&self, context: &str) -> Option<String> {
        let configured = self
            .chat
            .developer_message
            .clone()
            .filter(|m| !m.trim().is_empty());

        if context.is_empty() {
            return configured;
        }

        Some(format!(
            "Previous conversation context: {}\n\n{}",
            context,
            configured.unwrap_or_else(|| self.chat.default_system_message.clone())
        ))
    }
}
