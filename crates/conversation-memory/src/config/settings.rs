use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub chat: ChatConfig,
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub chat_path: String,
    pub document_chat_path: String,
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            chat_path: "/api/chat".to_string(),
            document_chat_path: "/api/chat-pdf".to_string(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub summary_model: String,
    /// Developer message sent with general chat when there is no history yet
    pub developer_message: Option<String>,
    /// Fallback instruction placed after injected history
    pub default_system_message: String,
    /// Optional startup credential; can also be set at runtime
    pub api_key: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            developer_message: None,
            default_system_message: "You are a helpful AI assistant.".to_string(),
            api_key: None,
        }
    }
}

/// Message-history budget
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ContextConfig {
    /// Message count at which the track switches to summary + short window
    pub summary_threshold: usize,
    /// Messages sent verbatim below the threshold
    pub recent_window: usize,
    /// Messages sent verbatim alongside the summary
    pub summary_phase_window: usize,
    /// Messages fed to the summarizer
    pub summary_source_window: usize,
    /// Minimum rendered history length worth summarizing
    pub min_summary_source_chars: usize,
    pub max_document_refs: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            summary_threshold: 25,
            recent_window: 10,
            summary_phase_window: 5,
            summary_source_window: 20,
            min_summary_source_chars: 100,
            max_document_refs: 3,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
