use async_trait::async_trait;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::Client as HttpClient;
use serde_json::Value;
use url::Url;

use crate::api::backend::{ChatBackend, OutgoingMessage, Upload};
use crate::api::models::{Conversation, ConversationListBody, ConversationPage, ConversationPageBody};
use crate::app::ChatConfig;
use crate::error::ChatError;

pub struct ApiClient {
    pub http: HttpClient,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        Self::with_http(HttpClient::new(), config)
    }

    pub fn with_http(http: HttpClient, config: &ChatConfig) -> Result<Self, ChatError> {
        Ok(Self {
            http,
            base_url: Self::base_api(&config.base_url)?,
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Always ends in `/` so relative joins keep the full base path.
    fn base_api(base_url: &str) -> Result<Url, ChatError> {
        let normalized = crate::utils::normalize_url(base_url);
        let trimmed = normalized.trim_end_matches('/');
        Ok(Url::parse(&format!("{}/", trimmed))?)
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn with_auth(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(t) = &self.token {
            req = req.bearer_auth(t);
        }
        req.header("Accept", "application/json")
    }

    async fn get_json(&self, path: &str) -> Result<Value, ChatError> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);
        let resp = self.with_auth(self.http.get(url)).send().await?;
        if !resp.status().is_success() {
            return Err(ChatError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<Value>().await?)
    }

    fn upload_part(upload: Upload) -> Result<Part, ChatError> {
        Ok(Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)?)
    }

    fn multipart(message: OutgoingMessage) -> Result<Form, ChatError> {
        let field = message.field_name().unwrap_or("file");
        let form = match message {
            OutgoingMessage::Text(text) => Form::new().text("message", text),
            OutgoingMessage::Voice { audio, duration_secs } => Form::new()
                .text("duration", duration_secs.to_string())
                .part(field, Self::upload_part(audio)?),
            OutgoingMessage::File { upload, caption } | OutgoingMessage::Media { upload, caption } => {
                let form = Form::new().part(field, Self::upload_part(upload)?);
                match caption.filter(|c| !c.trim().is_empty()) {
                    Some(c) => form.text("message", c),
                    None => form,
                }
            }
        };
        Ok(form)
    }
}

/// Pull a conversation id out of whatever shape the resolve endpoint returned.
fn conversation_id_from(json: &Value) -> Option<String> {
    let candidates = [
        json.get("conversation_id"),
        json.get("id"),
        json.get("conversation").and_then(|c| c.get("id")),
        json.get("data").and_then(|d| d.get("id")),
        json.get("data").and_then(|d| d.get("conversation_id")),
    ];
    candidates.into_iter().flatten().find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let json = self.get_json("admin/chats").await?;
        let body: ConversationListBody =
            serde_json::from_value(json).map_err(|e| ChatError::Decode(e.to_string()))?;
        Ok(body.data)
    }

    async fn conversation(&self, id: &str) -> Result<ConversationPage, ChatError> {
        let json = self.get_json(&format!("admin/chats/{}", id)).await?;
        let body: ConversationPageBody =
            serde_json::from_value(json).map_err(|e| ChatError::Decode(e.to_string()))?;
        Ok(body.into())
    }

    async fn resolve_conversation(&self, user_id: &str) -> Result<String, ChatError> {
        let json = self.get_json(&format!("conversations/{}", user_id)).await?;
        conversation_id_from(&json).ok_or_else(|| {
            warn!("resolve response for user {} had no conversation id", user_id);
            ChatError::Decode("No conversation id in response".into())
        })
    }

    async fn send_message(&self, conversation_id: &str, message: OutgoingMessage) -> Result<(), ChatError> {
        let url = self.endpoint(&format!("admin/chats/{}/messages", conversation_id))?;
        debug!("POST {} ({:?})", url, message.field_name().unwrap_or("text"));
        let req = self.with_auth(self.http.post(url));
        let req = match message {
            OutgoingMessage::Text(text) => req.json(&serde_json::json!({ "message": text })),
            other => req.multipart(Self::multipart(other)?),
        };
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ChatError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}
