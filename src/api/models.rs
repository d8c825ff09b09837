use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Backend ids arrive as numbers from some endpoints and strings from others.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(i64),
        Str(String),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "id_string")] String);
    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Participant {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "avatar")]
    pub image: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Denormalized summary of the newest message in a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LastMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachment_path: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl LastMessage {
    pub fn preview(&self) -> String {
        match (&self.message, &self.attachment_path) {
            (Some(text), _) if !text.trim().is_empty() => text.trim().to_string(),
            (_, Some(_)) => "📎 Attachment".to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, alias = "users")]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Conversation {
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }

    /// The first participant that is not the viewer, falling back to the first one.
    pub fn counterpart(&self, viewer_id: Option<&str>) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| Some(p.id.as_str()) != viewer_id)
            .or_else(|| self.participants.first())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SenderInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "avatar")]
    pub image: Option<String>,
}

/// A message exactly as the backend sends it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RawMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub conversation_id: Option<String>,
    #[serde(deserialize_with = "id_string")]
    pub sender_id: String,
    #[serde(default)]
    pub sender: Option<SenderInfo>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachment_path: Option<String>,
    #[serde(default, alias = "original_name")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default, alias = "type")]
    pub attachment_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Voice,
    File,
    Image,
    Video,
}

impl AttachmentKind {
    /// Voice notes are recorded as webm/ogg, so those containers count as
    /// audio here even though they can also hold video.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "webm" | "ogg" | "oga" | "opus" => Some(Self::Voice),
            _ => mime_guess::from_ext(ext)
                .first()
                .and_then(|mime| Self::from_mime(mime.essence_str())),
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime.starts_with("video/") {
            Some(Self::Video)
        } else if mime.starts_with("audio/") {
            Some(Self::Voice)
        } else if mime.is_empty() {
            None
        } else {
            Some(Self::File)
        }
    }

    fn from_hint(hint: &str) -> Option<Self> {
        match hint.to_ascii_lowercase().as_str() {
            "voice" | "audio" => Some(Self::Voice),
            "image" | "photo" => Some(Self::Image),
            "video" => Some(Self::Video),
            "file" | "document" => Some(Self::File),
            _ => None,
        }
    }

    /// Type hint first, then MIME, then the extension of the name or URL.
    pub fn classify(hint: Option<&str>, mime: Option<&str>, name_or_url: &str) -> Self {
        hint.and_then(Self::from_hint)
            .or_else(|| mime.and_then(Self::from_mime))
            .or_else(|| extension(name_or_url).and_then(Self::from_extension))
            .unwrap_or(Self::File)
    }
}

/// Lowercase-insensitive extension of a file name or URL path, ignoring any query string.
pub fn extension(name_or_url: &str) -> Option<&str> {
    let path = name_or_url.split(['?', '#']).next().unwrap_or(name_or_url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// File name shown for an attachment when the backend did not send one.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "attachment".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub file_name: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub duration_secs: Option<u64>,
}

impl Attachment {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
            size: None,
            mime_type: None,
            duration_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Text(String),
    Voice { attachment: Attachment, caption: Option<String> },
    File { attachment: Attachment, caption: Option<String> },
    Image { attachment: Attachment, caption: Option<String> },
    Video { attachment: Attachment, caption: Option<String> },
}

impl MessagePayload {
    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            Self::Text(_) => None,
            Self::Voice { attachment, .. }
            | Self::File { attachment, .. }
            | Self::Image { attachment, .. }
            | Self::Video { attachment, .. } => Some(attachment),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_image: Option<String>,
    pub created_at: Option<String>,
    pub payload: MessagePayload,
}

impl Message {
    pub fn is_from(&self, viewer_id: &str) -> bool {
        self.sender_id == viewer_id
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|t| t.and_utc())
            })
    }

    /// Local `HH:MM`, empty when the timestamp is missing or unparseable.
    pub fn time_label(&self) -> String {
        self.sent_at()
            .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_default()
    }
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        let text = raw.message.filter(|m| !m.trim().is_empty());
        let payload = match raw.attachment_path.filter(|p| !p.is_empty()) {
            Some(url) => {
                let file_name = raw
                    .file_name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| file_name_from_url(&url));
                let kind = AttachmentKind::classify(
                    raw.attachment_type.as_deref(),
                    raw.mime_type.as_deref(),
                    &file_name,
                );
                let kind = if kind == AttachmentKind::File && extension(&file_name).is_none() {
                    AttachmentKind::classify(None, None, &url)
                } else {
                    kind
                };
                let attachment = Attachment {
                    url,
                    file_name,
                    size: raw.file_size,
                    mime_type: raw.mime_type,
                    duration_secs: raw.duration,
                };
                let caption = text;
                match kind {
                    AttachmentKind::Voice => MessagePayload::Voice { attachment, caption },
                    AttachmentKind::Image => MessagePayload::Image { attachment, caption },
                    AttachmentKind::Video => MessagePayload::Video { attachment, caption },
                    AttachmentKind::File => MessagePayload::File { attachment, caption },
                }
            }
            None => MessagePayload::Text(text.unwrap_or_default()),
        };
        let sender = raw.sender.unwrap_or_default();
        Self {
            id: raw.id,
            conversation_id: raw.conversation_id,
            sender_id: raw.sender_id,
            sender_name: sender.name,
            sender_image: sender.image,
            created_at: raw.created_at,
            payload,
        }
    }
}

/// The header plus one backend page of messages. Pagination is opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPage {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationListBody {
    #[serde(default)]
    pub data: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesBody {
    #[serde(default)]
    pub data: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationPageBody {
    pub conversation: Conversation,
    #[serde(default = "empty_messages")]
    pub messages: MessagesBody,
}

fn empty_messages() -> MessagesBody {
    MessagesBody { data: Vec::new() }
}

impl From<ConversationPageBody> for ConversationPage {
    fn from(body: ConversationPageBody) -> Self {
        Self {
            conversation: body.conversation,
            messages: body.messages.data.into_iter().map(Message::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> Message {
        serde_json::from_value::<RawMessage>(json).unwrap().into()
    }

    #[test]
    fn text_message_without_attachment() {
        let msg = raw(serde_json::json!({
            "id": 1, "sender_id": 7, "message": "hello",
            "sender": {"name": "Ana", "image": null}
        }));
        assert_eq!(msg.id, "1");
        assert_eq!(msg.sender_id, "7");
        assert_eq!(msg.payload, MessagePayload::Text("hello".into()));
    }

    #[test]
    fn attachment_wins_and_text_becomes_caption() {
        let msg = raw(serde_json::json!({
            "id": "m2", "sender_id": "7", "message": "see this",
            "attachment_path": "https://cdn.example/uploads/photo.JPG?sig=1"
        }));
        match msg.payload {
            MessagePayload::Image { attachment, caption } => {
                assert_eq!(attachment.file_name, "photo.JPG");
                assert_eq!(caption.as_deref(), Some("see this"));
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn voice_detected_from_type_hint() {
        let msg = raw(serde_json::json!({
            "id": 3, "sender_id": 1, "type": "voice", "duration": 12,
            "attachment_path": "https://cdn.example/blob"
        }));
        match msg.payload {
            MessagePayload::Voice { attachment, .. } => assert_eq!(attachment.duration_secs, Some(12)),
            other => panic!("expected voice, got {other:?}"),
        }
    }

    #[test]
    fn unknown_extension_is_a_file() {
        let msg = raw(serde_json::json!({
            "id": 4, "sender_id": 1, "attachment_path": "https://x/report.pdf"
        }));
        assert!(matches!(msg.payload, MessagePayload::File { .. }));
    }

    #[test]
    fn extension_lookup_uses_mime_table() {
        assert_eq!(AttachmentKind::from_extension("avi"), Some(AttachmentKind::Video));
        assert_eq!(AttachmentKind::from_extension("SVG"), Some(AttachmentKind::Image));
        assert_eq!(AttachmentKind::from_extension("mp3"), Some(AttachmentKind::Voice));
        assert_eq!(AttachmentKind::from_extension("webm"), Some(AttachmentKind::Voice));
        assert_eq!(AttachmentKind::from_extension("pdf"), Some(AttachmentKind::File));
    }

    #[test]
    fn counterpart_skips_viewer() {
        let conv: Conversation = serde_json::from_value(serde_json::json!({
            "id": 9,
            "users": [{"id": 1, "name": "Me"}, {"id": 2, "name": "Teacher"}]
        }))
        .unwrap();
        assert_eq!(conv.counterpart(Some("1")).unwrap().name, "Teacher");
        assert_eq!(conv.counterpart(None).unwrap().name, "Me");
    }

    #[test]
    fn extension_ignores_query_and_dotfiles() {
        assert_eq!(extension("https://x/a.pdf?dl=1"), Some("pdf"));
        assert_eq!(extension(".bashrc"), None);
        assert_eq!(extension("noext"), None);
    }

    #[test]
    fn parses_rfc3339_and_sql_timestamps() {
        let mut msg = raw(serde_json::json!({"id": 1, "sender_id": 1, "message": "x"}));
        msg.created_at = Some("2024-03-01T10:15:00.000000Z".into());
        assert!(msg.sent_at().is_some());
        msg.created_at = Some("2024-03-01 10:15:00".into());
        assert!(msg.sent_at().is_some());
        msg.created_at = Some("yesterday".into());
        assert_eq!(msg.time_label(), "");
    }
}
