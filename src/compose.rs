//! Outbound side of an open conversation. Failures are reported to the user
//! as notices and also returned so callers can update their controls.

use std::sync::Arc;

use log::debug;

use crate::api::backend::{ChatBackend, OutgoingMessage};
use crate::attachments::AttachmentPreparer;
use crate::error::{AttachmentError, ChatError, RecorderError};
use crate::notice::{Notice, Notifier};
use crate::recorder::{AudioSource, VoiceRecorder};
use crate::store::ConversationStore;

pub struct Composer<B: ChatBackend> {
    store: Arc<ConversationStore<B>>,
    notifier: Arc<dyn Notifier>,
    conversation_id: String,
}

impl<B: ChatBackend> Composer<B> {
    pub fn new(store: Arc<ConversationStore<B>>, notifier: Arc<dyn Notifier>, conversation_id: impl Into<String>) -> Self {
        Self {
            store,
            notifier,
            conversation_id: conversation_id.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Blank input is ignored.
    pub async fn send_text(&self, text: &str) -> Result<(), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.store
            .send(&self.conversation_id, OutgoingMessage::Text(text.to_string()))
            .await
            .inspect_err(|e| self.notifier.notify(Notice::error(format!("Failed to send message: {e}"))))
    }

    pub async fn start_recording<S: AudioSource>(&self, recorder: &mut VoiceRecorder<S>) -> Result<(), RecorderError> {
        recorder.start().await.inspect_err(|e| match e {
            RecorderError::InvalidState(_) => {}
            other => self.notifier.notify(Notice::warning(other.to_string())),
        })
    }

    /// A recording under the minimum length is refused quietly; the send
    /// control is expected to be disabled in that case.
    pub async fn send_voice<S: AudioSource>(&self, recorder: &mut VoiceRecorder<S>) -> Result<(), RecorderError> {
        let store = self.store.clone();
        let conversation_id = self.conversation_id.clone();
        let result = recorder
            .send(|asset, duration_secs| async move {
                debug!("sending {} byte voice note ({}s)", asset.bytes.len(), duration_secs);
                store
                    .send(
                        &conversation_id,
                        OutgoingMessage::Voice {
                            audio: asset.into_upload(),
                            duration_secs,
                        },
                    )
                    .await
            })
            .await;
        match &result {
            Err(RecorderError::RecordingTooShort { .. }) | Err(RecorderError::InvalidState(_)) | Ok(()) => {}
            Err(RecorderError::EmptyRecording) => self.notifier.notify(Notice::warning("Nothing was recorded")),
            Err(e) => self.notifier.notify(Notice::error(e.to_string())),
        }
        result
    }

    /// Send every staged file as its own message; `caption` goes with the first.
    pub async fn send_staged(&self, preparer: &AttachmentPreparer, caption: Option<String>) -> Result<(), AttachmentError> {
        let store = self.store.clone();
        let conversation_id = self.conversation_id.clone();
        preparer
            .confirm_send(|files| async move {
                let mut caption = caption.filter(|c| !c.trim().is_empty());
                let messages = files
                    .into_iter()
                    .map(|f| f.into_outgoing(caption.take()))
                    .collect();
                store.send_all(&conversation_id, messages).await
            })
            .await
            .inspect_err(|e| self.notifier.notify(Notice::error(e.to_string())))
    }
}

/// Resolve the conversation with `user_id` for navigation. On failure the
/// user gets a notice and `None` is returned.
pub async fn open_chat<B: ChatBackend>(
    store: &ConversationStore<B>,
    notifier: &dyn Notifier,
    user_id: &str,
) -> Option<String> {
    match store.resolve_or_create_conversation(user_id).await {
        Ok(id) => Some(id),
        Err(e) => {
            notifier.notify(Notice::error(format!("Could not open chat: {e}")));
            None
        }
    }
}
