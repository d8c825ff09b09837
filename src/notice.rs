use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient, non-blocking message for the user (a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: Option<String>,
    pub body: String,
}

impl Notice {
    pub fn info(body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: None,
            body: body.into(),
        }
    }

    pub fn warning(body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            title: None,
            body: body.into(),
        }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: None,
            body: body.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log. Used by the CLI host.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        let title = notice.title.as_deref().unwrap_or("classchat");
        match notice.level {
            NoticeLevel::Info => info!("[{}] {}", title, notice.body),
            NoticeLevel::Warning => warn!("[{}] {}", title, notice.body),
            NoticeLevel::Error => error!("[{}] {}", title, notice.body),
        }
    }
}
