pub mod chat_backend;
pub mod conversation;
pub mod dispatcher;

pub use chat_backend::{ChatBackend, HttpChatBackend};
pub use conversation::ConversationContextManager;
pub use dispatcher::RequestDispatcher;
