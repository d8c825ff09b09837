//! Image and video attachments, plus the full-screen image overlay.

use crate::api::models::Attachment;
use crate::download::{DownloadRequest, Downloader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaView {
    pub kind: MediaKind,
    pub url: String,
    pub file_name: String,
    pub caption: Option<String>,
    /// Videos use the platform's own transport controls.
    pub native_controls: bool,
}

impl MediaView {
    pub fn new(kind: MediaKind, attachment: &Attachment, caption: Option<String>) -> Self {
        Self {
            kind,
            url: attachment.url.clone(),
            file_name: attachment.file_name.clone(),
            caption,
            native_controls: kind == MediaKind::Video,
        }
    }

    pub fn download(&self, downloader: &dyn Downloader) {
        downloader.trigger(DownloadRequest::new(&self.url, &self.file_name));
    }
}

/// Where a pointer click landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Thumbnail,
    Image,
    Backdrop,
    CloseButton,
    DownloadButton,
}

/// Whether a click was consumed, i.e. must not reach the layer below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Stop,
    Continue,
}

#[derive(Debug, Default)]
pub struct Lightbox {
    open: Option<MediaView>,
}

impl Lightbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn current(&self) -> Option<&MediaView> {
        self.open.as_ref()
    }

    pub fn close(&mut self) {
        self.open = None;
    }

    /// Route a click. `media` is the view the thumbnail belongs to.
    pub fn click(&mut self, target: ClickTarget, media: &MediaView, downloader: &dyn Downloader) -> Propagation {
        match (target, self.open.is_some()) {
            (ClickTarget::Thumbnail, false) if media.kind == MediaKind::Image => {
                self.open = Some(media.clone());
                Propagation::Stop
            }
            (ClickTarget::Image, true) => Propagation::Stop,
            (ClickTarget::Backdrop, true) => {
                self.close();
                Propagation::Stop
            }
            (ClickTarget::CloseButton, true) => {
                self.close();
                Propagation::Stop
            }
            (ClickTarget::DownloadButton, _) => {
                let shown = self.open.as_ref().unwrap_or(media);
                shown.download(downloader);
                Propagation::Stop
            }
            _ => Propagation::Continue,
        }
    }
}
