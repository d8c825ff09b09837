//! Chat core of the classroom platform: conversation cache over the REST
//! backend, outbound text/voice/file messages, voice capture, display models
//! for inbound messages and push-driven refresh.

pub mod api;
pub mod app;
pub mod audio;
pub mod attachments;
pub mod bridge;
pub mod compose;
pub mod download;
pub mod error;
pub mod notice;
pub mod recorder;
pub mod render;
pub mod store;
pub mod utils;

pub use api::backend::{ChatBackend, OutgoingMessage, Upload};
pub use api::client::ApiClient;
pub use app::ChatConfig;
pub use error::{AttachmentError, AudioError, ChatError, ConfigError, PartialSend, RecorderError};
pub use store::{CacheKey, ConversationStore, Invalidate};
