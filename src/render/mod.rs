//! Display models for messages and conversations. Nothing here performs I/O;
//! downloads go through an injected [`Downloader`].

pub mod file;
pub mod media;
pub mod voice;

use crate::api::models::{Conversation, ConversationPage, Message, MessagePayload};
use crate::download::{DownloadRequest, Downloader};
use crate::utils::format_clock;

use self::file::FileView;
use self::media::{MediaKind, MediaView};
use self::voice::{WAVEFORM_BARS, decorative_waveform};

/// A voice note before any player is attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceNoteView {
    pub url: String,
    pub file_name: String,
    pub duration_label: Option<String>,
    pub waveform: Vec<u8>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageView {
    Text(String),
    Voice(VoiceNoteView),
    Media(MediaView),
    File(FileView),
}

impl MessageView {
    pub fn new(message: &Message) -> Self {
        match &message.payload {
            MessagePayload::Text(text) => Self::Text(text.clone()),
            MessagePayload::Voice { attachment, caption } => Self::Voice(VoiceNoteView {
                url: attachment.url.clone(),
                file_name: attachment.file_name.clone(),
                duration_label: attachment.duration_secs.map(format_clock),
                waveform: decorative_waveform(&message.id, WAVEFORM_BARS),
                caption: caption.clone(),
            }),
            MessagePayload::Image { attachment, caption } => {
                Self::Media(MediaView::new(MediaKind::Image, attachment, caption.clone()))
            }
            MessagePayload::Video { attachment, caption } => {
                Self::Media(MediaView::new(MediaKind::Video, attachment, caption.clone()))
            }
            MessagePayload::File { attachment, caption } => Self::File(FileView::new(attachment, caption.clone())),
        }
    }

    pub fn download_request(&self) -> Option<DownloadRequest> {
        match self {
            Self::Text(_) => None,
            Self::Voice(v) => Some(DownloadRequest::new(&v.url, &v.file_name)),
            Self::Media(m) => Some(DownloadRequest::new(&m.url, &m.file_name)),
            Self::File(f) => Some(DownloadRequest::new(&f.url, &f.file_name)),
        }
    }

    /// Trigger the download action. Returns false for text messages.
    pub fn download(&self, downloader: &dyn Downloader) -> bool {
        match self.download_request() {
            Some(request) => {
                downloader.trigger(request);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Sent by the viewer.
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub alignment: Alignment,
    pub sender_name: String,
    pub sender_image: Option<String>,
    pub time_label: String,
    pub view: MessageView,
}

impl MessageRow {
    pub fn new(message: &Message, viewer_id: &str) -> Self {
        Self {
            id: message.id.clone(),
            alignment: if message.is_from(viewer_id) {
                Alignment::Outgoing
            } else {
                Alignment::Incoming
            },
            sender_name: message.sender_name.clone(),
            sender_image: message.sender_image.clone(),
            time_label: message.time_label(),
            view: MessageView::new(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadView {
    pub conversation_id: String,
    pub title: String,
    pub rows: Vec<MessageRow>,
}

impl ThreadView {
    pub fn new(page: &ConversationPage, viewer_id: &str) -> Self {
        Self {
            conversation_id: page.conversation.id.clone(),
            title: page
                .conversation
                .counterpart(Some(viewer_id))
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            rows: page.messages.iter().map(|m| MessageRow::new(m, viewer_id)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    pub avatar: Option<String>,
    pub preview: String,
    pub timestamp: Option<String>,
    pub unread: bool,
}

impl ConversationRow {
    pub fn new(conversation: &Conversation, viewer_id: Option<&str>) -> Self {
        let counterpart = conversation.counterpart(viewer_id);
        let last = conversation.last_message.clone().unwrap_or_default();
        Self {
            id: conversation.id.clone(),
            title: counterpart
                .map(|p| p.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Chat".to_string()),
            avatar: counterpart.and_then(|p| p.image.clone()),
            preview: last.preview(),
            timestamp: last.created_at.or_else(|| conversation.updated_at.clone()),
            unread: conversation.has_unread(),
        }
    }
}
