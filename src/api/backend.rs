use async_trait::async_trait;

use crate::api::models::{Conversation, ConversationPage};
use crate::error::ChatError;

/// A binary payload on its way to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Voice { audio: Upload, duration_secs: u64 },
    File { upload: Upload, caption: Option<String> },
    Media { upload: Upload, caption: Option<String> },
}

impl OutgoingMessage {
    /// Multipart field that carries the binary part, if any.
    pub fn field_name(&self) -> Option<&'static str> {
        match self {
            Self::Text(_) => None,
            Self::Voice { .. } => Some("voice"),
            Self::File { .. } => Some("file"),
            Self::Media { .. } => Some("media"),
        }
    }
}

/// The REST surface the chat core consumes.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn conversations(&self) -> Result<Vec<Conversation>, ChatError>;

    async fn conversation(&self, id: &str) -> Result<ConversationPage, ChatError>;

    /// Find or create the conversation with `user_id` and return its id.
    async fn resolve_conversation(&self, user_id: &str) -> Result<String, ChatError>;

    async fn send_message(&self, conversation_id: &str, message: OutgoingMessage) -> Result<(), ChatError>;
}
