//! Staging of user-selected files before they are sent.
//!
//! A selection is validated as a whole: one oversized file rejects the batch.
//! Only one upload runs at a time per preparer, and a failed upload leaves
//! the staged files in place for a manual retry.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::{info, warn};

use crate::api::backend::{OutgoingMessage, Upload};
use crate::app::ChatConfig;
use crate::error::{AttachmentError, PartialSend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub size: u64,
    pub kind: FileKind,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl StagedFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = mime_guess::from_path(&name).first_or_octet_stream().to_string();
        let kind = if mime_type.starts_with("image/") {
            FileKind::Image
        } else if mime_type.starts_with("video/") {
            FileKind::Video
        } else {
            FileKind::Other
        };
        Self {
            size: bytes.len() as u64,
            name,
            kind,
            mime_type,
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        Ok(Self::from_bytes(name, bytes))
    }

    /// Images and videos go out as `media`, everything else as `file`.
    pub fn into_outgoing(self, caption: Option<String>) -> OutgoingMessage {
        let kind = self.kind;
        let upload = Upload {
            file_name: self.name,
            mime_type: self.mime_type,
            bytes: self.bytes,
        };
        match kind {
            FileKind::Image | FileKind::Video => OutgoingMessage::Media { upload, caption },
            FileKind::Other => OutgoingMessage::File { upload, caption },
        }
    }
}

#[derive(Default)]
struct PreparerState {
    staged: Vec<StagedFile>,
    in_flight: bool,
}

pub struct AttachmentPreparer {
    max_bytes: u64,
    state: Mutex<PreparerState>,
}

/// Clears the in-flight flag even if the upload future is dropped.
struct InFlight<'a> {
    preparer: &'a AttachmentPreparer,
    armed: bool,
}

impl InFlight<'_> {
    /// Update the staged list and end the upload under one lock.
    fn finish(mut self, update: impl FnOnce(&mut Vec<StagedFile>)) {
        let mut state = self.preparer.state();
        update(&mut state.staged);
        state.in_flight = false;
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.preparer.state().in_flight = false;
        }
    }
}

impl AttachmentPreparer {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(PreparerState::default()),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.max_upload_bytes())
    }

    fn state(&self) -> MutexGuard<'_, PreparerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn check(&self, files: &[StagedFile]) -> Result<(), AttachmentError> {
        match files.iter().find(|f| f.size > self.max_bytes) {
            Some(f) => Err(AttachmentError::FileTooLarge {
                name: f.name.clone(),
                size: f.size,
                max: self.max_bytes,
            }),
            None => Ok(()),
        }
    }

    /// Replace the staged list with a new selection.
    pub fn stage(&self, files: Vec<StagedFile>) -> Result<(), AttachmentError> {
        self.check(&files).inspect_err(|e| warn!("selection rejected: {e}"))?;
        let mut state = self.state();
        if state.in_flight {
            return Err(AttachmentError::UploadInFlight);
        }
        state.staged = files;
        Ok(())
    }

    pub fn staged(&self) -> Vec<StagedFile> {
        self.state().staged.clone()
    }

    pub fn is_uploading(&self) -> bool {
        self.state().in_flight
    }

    pub fn can_confirm(&self) -> bool {
        let state = self.state();
        !state.in_flight && !state.staged.is_empty()
    }

    pub fn cancel(&self) {
        let mut state = self.state();
        if !state.in_flight {
            state.staged.clear();
        }
    }

    /// Hand every staged file to `upload` in one call. Cleared on success.
    /// On failure the files the callback reports as delivered are dropped
    /// and the rest stay staged, so a retry does not send anything twice.
    pub async fn confirm_send<F, Fut, E>(&self, upload: F) -> Result<(), AttachmentError>
    where
        F: FnOnce(Vec<StagedFile>) -> Fut,
        Fut: Future<Output = Result<(), PartialSend<E>>>,
        E: Display,
    {
        let files = {
            let mut state = self.state();
            if state.in_flight {
                return Err(AttachmentError::UploadInFlight);
            }
            if state.staged.is_empty() {
                return Err(AttachmentError::NothingStaged);
            }
            self.check(&state.staged)?;
            state.in_flight = true;
            state.staged.clone()
        };
        let count = files.len();
        let guard = InFlight {
            preparer: self,
            armed: true,
        };
        match upload(files).await {
            Ok(()) => {
                guard.finish(|staged| staged.clear());
                info!("uploaded {} attachment(s)", count);
                Ok(())
            }
            Err(failure) => {
                let delivered = failure.delivered.min(count);
                guard.finish(|staged| {
                    staged.drain(..delivered.min(staged.len()));
                });
                warn!("attachment upload failed after {}/{}: {}", delivered, count, failure.error);
                Err(AttachmentError::UploadFailed(failure.error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn file(name: &str, size: usize) -> StagedFile {
        StagedFile::from_bytes(name, vec![0; size])
    }

    #[test]
    fn mime_types_come_from_the_name() {
        assert_eq!(file("pic.svg", 1).mime_type, "image/svg+xml");
        assert_eq!(file("pic.svg", 1).kind, FileKind::Image);
        assert_eq!(file("clip.avi", 1).mime_type, "video/x-msvideo");
        assert_eq!(file("clip.avi", 1).kind, FileKind::Video);
        assert_eq!(file("memo.mp3", 1).mime_type, "audio/mpeg");
        assert_eq!(file("memo.mp3", 1).kind, FileKind::Other);
        assert_eq!(file("doc.odt", 1).mime_type, "application/vnd.oasis.opendocument.text");
        assert_eq!(file("blob", 1).mime_type, "application/octet-stream");
        assert!(matches!(file("clip.avi", 1).into_outgoing(None), OutgoingMessage::Media { .. }));
    }

    #[test]
    fn kinds_from_names() {
        assert_eq!(file("a.PNG", 1).kind, FileKind::Image);
        assert_eq!(file("clip.mov", 1).kind, FileKind::Video);
        assert_eq!(file("notes.pdf", 1).kind, FileKind::Other);
        assert_eq!(file("notes.pdf", 1).mime_type, "application/pdf");
        assert!(matches!(file("a.jpg", 1).into_outgoing(None), OutgoingMessage::Media { .. }));
        assert!(matches!(file("a.pdf", 1).into_outgoing(None), OutgoingMessage::File { .. }));
    }

    #[test]
    fn oversized_file_rejects_whole_batch() {
        let preparer = AttachmentPreparer::new(10);
        preparer.stage(vec![file("ok.txt", 5)]).unwrap();
        let err = preparer.stage(vec![file("a.txt", 3), file("big.bin", 11)]).unwrap_err();
        assert_eq!(err, AttachmentError::FileTooLarge { name: "big.bin".into(), size: 11, max: 10 });
        let staged = preparer.staged();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].name, "ok.txt");
    }

    #[tokio::test]
    async fn confirm_hands_over_all_files_once() {
        let preparer = AttachmentPreparer::new(100);
        preparer.stage(vec![file("a.txt", 1), file("b.png", 2), file("c.mp4", 3)]).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        preparer
            .confirm_send(|files| async move {
                c.fetch_add(1, Ordering::SeqCst);
                assert_eq!(files.len(), 3);
                Ok::<(), PartialSend<String>>(())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(preparer.staged().is_empty());
        assert!(!preparer.is_uploading());
    }

    #[tokio::test]
    async fn failure_keeps_staged_files() {
        let preparer = AttachmentPreparer::new(100);
        preparer.stage(vec![file("a.txt", 1)]).unwrap();
        let err = preparer
            .confirm_send(|_| async { Err::<(), _>(PartialSend::from("HTTP 413")) })
            .await
            .unwrap_err();
        assert_eq!(err, AttachmentError::UploadFailed("HTTP 413".into()));
        assert_eq!(preparer.staged().len(), 1);
        assert!(preparer.can_confirm());
    }

    #[tokio::test]
    async fn empty_selection_cannot_be_sent() {
        let preparer = AttachmentPreparer::new(100);
        let err = preparer
            .confirm_send(|_| async { Ok::<(), PartialSend<String>>(()) })
            .await
            .unwrap_err();
        assert_eq!(err, AttachmentError::NothingStaged);
    }

    #[tokio::test]
    async fn second_confirm_while_uploading_is_rejected() {
        let preparer = AttachmentPreparer::new(100);
        preparer.stage(vec![file("a.txt", 1)]).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut first = Box::pin(preparer.confirm_send(|_| async move {
            let _ = rx.await;
            Ok::<(), PartialSend<String>>(())
        }));
        assert!(futures_util::poll!(&mut first).is_pending());
        assert!(preparer.is_uploading());
        assert!(!preparer.can_confirm());

        let second = preparer
            .confirm_send(|_| async { Ok::<(), PartialSend<String>>(()) })
            .await;
        assert_eq!(second, Err(AttachmentError::UploadInFlight));

        tx.send(()).unwrap();
        assert!(first.await.is_ok());
        assert!(!preparer.is_uploading());
        assert!(preparer.staged().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_unstages_delivered_files() {
        let preparer = AttachmentPreparer::new(100);
        preparer
            .stage(vec![file("a.pdf", 1), file("b.pdf", 1), file("c.pdf", 1)])
            .unwrap();
        let err = preparer
            .confirm_send(|_| async {
                Err::<(), _>(PartialSend {
                    delivered: 1,
                    error: "HTTP 500",
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err, AttachmentError::UploadFailed("HTTP 500".into()));
        let names: Vec<String> = preparer.staged().into_iter().map(|f| f.name).collect();
        assert_eq!(names, ["b.pdf", "c.pdf"]);
        assert!(!preparer.is_uploading());
    }

    #[tokio::test]
    async fn finished_upload_leaves_new_selection_alone() {
        let preparer = AttachmentPreparer::new(100);
        preparer.stage(vec![file("a.txt", 1)]).unwrap();
        preparer
            .confirm_send(|_| async { Ok::<(), PartialSend<String>>(()) })
            .await
            .unwrap();
        preparer.stage(vec![file("next.txt", 1)]).unwrap();
        assert_eq!(preparer.staged()[0].name, "next.txt");
        assert!(preparer.can_confirm());
    }

    #[test]
    fn upload_guard_updates_list_and_flag_together() {
        let preparer = AttachmentPreparer::new(100);
        preparer.stage(vec![file("a.txt", 1), file("b.txt", 1)]).unwrap();
        preparer.state().in_flight = true;
        let guard = InFlight {
            preparer: &preparer,
            armed: true,
        };
        guard.finish(|staged| {
            staged.remove(0);
        });
        let state = preparer.state();
        assert!(!state.in_flight);
        assert_eq!(state.staged.len(), 1);
    }

    #[test]
    fn cancel_clears_selection() {
        let preparer = AttachmentPreparer::from_config(&ChatConfig::default());
        assert_eq!(preparer.max_bytes(), 50 * 1024 * 1024);
        preparer.stage(vec![file("a.txt", 1)]).unwrap();
        preparer.cancel();
        assert!(preparer.staged().is_empty());
    }
}
