use crate::config::BackendConfig;
use crate::models::chat::{ChatRequest, DocumentChatRequest};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, warn};

/// Plain-text chunks in arrival order
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to reach chat backend: {0}")]
    Transport(String),

    /// Non-success status; `message` is already human readable
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),
}

/// Trait for the external chat backend
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat_stream(&self, request: ChatRequest) -> Result<TextStream, BackendError>;

    async fn document_chat_stream(
        &self,
        request: DocumentChatRequest,
    ) -> Result<TextStream, BackendError>;
}

/// Drain a stream into one string
pub async fn collect_text(mut stream: TextStream) -> Result<String, BackendError> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

#[derive(Clone)]
pub struct HttpChatBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpChatBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_stream<T: Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<TextStream, BackendError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.text().await {
                Ok(body) => describe_failure(status, &body),
                Err(_) => format!("Request failed ({}): Unable to read response", status.as_u16()),
            };
            warn!("Chat backend returned {}: {}", status, message);
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let mut body = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut decoder = Utf8Decoder::default();

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        let text = decoder.decode(&bytes);
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(BackendError::Stream(e.to_string()));
                        return;
                    }
                }
            }

            let rest = decoder.finish();
            if !rest.is_empty() {
                yield Ok(rest);
            }
        };

        Ok(Box::pin(stream))
    }
}

#[async_trait::async_trait]
impl ChatBackend for HttpChatBackend {
    async fn chat_stream(&self, request: ChatRequest) -> Result<TextStream, BackendError> {
        debug!("Starting chat stream (model={})", request.model);
        self.post_stream(&self.config.chat_path, &request).await
    }

    async fn document_chat_stream(
        &self,
        request: DocumentChatRequest,
    ) -> Result<TextStream, BackendError> {
        debug!(
            "Starting document chat stream (model={}, pdfs={})",
            request.model,
            request.pdf_ids.len()
        );
        self.post_stream(&self.config.document_chat_path, &request).await
    }
}

/// Turn an error response into one display string.
/// JSON bodies contribute their `detail` or `error` field; anything else is quoted.
pub fn describe_failure(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let field = value
            .get("detail")
            .filter(|v| !v.is_null())
            .or_else(|| value.get("error").filter(|v| !v.is_null()));

        return match field {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::String(_)) | None => "Request failed".to_string(),
            Some(other) => other.to_string(),
        };
    }

    let preview: String = body.chars().take(100).collect();
    format!("Request failed ({}): {}...", status.as_u16(), preview)
}

/// Incremental UTF-8 decoding across network chunk boundaries
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &Bytes) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // invalid sequence: replace and keep going
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // incomplete tail: wait for the next chunk
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
