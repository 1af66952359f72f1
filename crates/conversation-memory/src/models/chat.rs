use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type MessageId = u64;

// ===== DOMAIN MODELS =====

/// Conversation track (one per interaction mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    /// General chat against the plain chat endpoint
    #[serde(alias = "regular")]
    General,
    /// Chat grounded on uploaded PDFs
    #[serde(alias = "pdf")]
    Document,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::General, Track::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            Track::General => "general",
            Track::Document => "document",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Upper-case tag used when rendering history as plain text
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Track the message was recorded under, never changes
    pub mode: Track,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_refs: Option<Vec<String>>,
}

impl Message {
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        mode: Track,
        document_refs: Option<Vec<String>>,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            mode,
            document_refs,
        }
    }

    /// `ROLE: content`
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.label(), self.content)
    }
}

// ===== BACKEND REQUEST MODELS =====

/// Body for the plain chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
    pub user_message: String,
    pub model: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
}

/// Body for the PDF-grounded chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentChatRequest {
    pub user_message: String,
    pub pdf_ids: Vec<String>,
    pub model: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
}

// ===== API REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub pdf_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
}

// ===== RESPONSE EVENT MODELS =====

#[derive(Debug, Serialize)]
pub struct DeltaInfo {
    pub message_id: MessageId,
    pub content: String, // cumulative text so far
}

#[derive(Debug, Serialize)]
pub struct CompletionInfo {
    pub message_id: MessageId,
    pub request_id: String,
    pub summary_refreshed: bool,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}
