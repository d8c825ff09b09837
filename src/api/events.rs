use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::error::ChatError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushNotification {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Routing data attached to a push. Only `conversation_id` matters to chat;
/// the rest is kept for notification-click handling elsewhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushData {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub session_id: Option<serde_json::Value>,
    #[serde(default)]
    pub conversation_id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushEvent {
    #[serde(default)]
    pub notification: PushNotification,
    #[serde(default)]
    pub data: PushData,
}

impl PushEvent {
    pub fn body(&self) -> Option<&str> {
        self.notification.body.as_deref().filter(|b| !b.is_empty())
    }

    pub fn conversation_id(&self) -> Option<String> {
        match self.data.conversation_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ChatError> {
        serde_json::from_str(text).map_err(|e| ChatError::Decode(e.to_string()))
    }
}

/// Owned push event stream, independent of the URL it was opened with.
pub type PushStream = Pin<Box<dyn Stream<Item = PushEvent> + Send>>;

/// Open the push websocket and yield parsed events until the socket closes.
/// Frames that are not valid push payloads are skipped.
pub async fn connect_push(ws_url: &str) -> Result<PushStream, ChatError> {
    let url = Url::parse(ws_url)?;
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| ChatError::Push(e.to_string()))?;
    debug!("push socket connected to {}", url);
    Ok(Box::pin(ws_stream.filter_map(|frame| async move {
        match frame {
            Ok(WsMessage::Text(text)) => match PushEvent::parse(&text) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("ignoring malformed push frame: {e}");
                    None
                }
            },
            Ok(_) => None,
            Err(e) => {
                warn!("push socket error: {e}");
                None
            }
        }
    })))
}
