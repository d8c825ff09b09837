//! Turns push notifications into a toast plus cache invalidation.
//!
//! Pushes rarely say which conversation changed, so by default every cached
//! message page is invalidated along with the conversation list and the
//! notifications key. If a payload does carry `conversation_id`, only that
//! page is invalidated.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use log::{debug, info};
use tokio::task::JoinHandle;

use crate::api::events::PushEvent;
use crate::notice::{Notice, Notifier};
use crate::store::{CacheKey, Invalidate};

const FALLBACK_BODY: &str = "New notification";

pub struct NotificationBridge {
    cache: Arc<dyn Invalidate>,
    notifier: Arc<dyn Notifier>,
    task: Option<JoinHandle<()>>,
}

impl NotificationBridge {
    pub fn new(cache: Arc<dyn Invalidate>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cache,
            notifier,
            task: None,
        }
    }

    /// React to one push. Invalidation happens before the notice is shown.
    pub fn handle_event(event: &PushEvent, cache: &dyn Invalidate, notifier: &dyn Notifier) {
        cache.invalidate(CacheKey::Notifications);
        cache.invalidate(CacheKey::Conversations);
        match event.conversation_id() {
            Some(id) => {
                debug!("push for conversation {}", id);
                cache.invalidate(CacheKey::Messages(id));
            }
            None => cache.invalidate_all_messages(),
        }

        let body = event
            .body()
            .or(event.notification.title.as_deref())
            .unwrap_or(FALLBACK_BODY);
        let mut notice = Notice::info(body);
        if let Some(title) = event.notification.title.as_deref().filter(|t| *t != body) {
            notice = notice.with_title(title);
        }
        notifier.notify(notice);
    }

    /// Start listening to `stream`. An existing subscription is dropped
    /// first so there is never more than one listener.
    pub fn attach<S>(&mut self, stream: S)
    where
        S: Stream<Item = PushEvent> + Send + Unpin + 'static,
    {
        self.detach();
        let cache = self.cache.clone();
        let notifier = self.notifier.clone();
        self.task = Some(crate::utils::spawn_async(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                Self::handle_event(&event, cache.as_ref(), notifier.as_ref());
            }
            info!("push stream ended");
        }));
    }

    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("push listener detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Resolves when the current stream ends on its own.
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.detach();
    }
}
