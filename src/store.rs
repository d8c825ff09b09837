//! Cached view of the backend's conversations and message pages.
//!
//! Reads are served from the cache until a key is invalidated; the next read
//! after that goes to the backend. Invalidation only flips a flag and
//! announces the key on the change feed, so repeating it is harmless.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::api::backend::{ChatBackend, OutgoingMessage};
use crate::api::models::{Conversation, ConversationPage};
use crate::error::{ChatError, PartialSend};

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Notifications,
    Conversations,
    Messages(String),
    Resolution(String),
}

/// Anything that can be told a cache key went stale.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, key: CacheKey);

    /// Mark every cached message page stale.
    fn invalidate_all_messages(&self);
}

#[derive(Default)]
struct CacheState {
    conversations: Option<Vec<Conversation>>,
    threads: HashMap<String, ConversationPage>,
    resolutions: HashMap<String, String>,
    /// Keys holding a cached value that must be re-fetched on next read.
    stale: HashSet<CacheKey>,
    /// Fetches currently running, with the invalidation count seen since the first began.
    fetching: HashMap<CacheKey, InFlight>,
}

#[derive(Default)]
struct InFlight {
    count: usize,
    generation: u64,
}

impl CacheState {
    fn generation(&self, key: &CacheKey) -> u64 {
        self.fetching.get(key).map_or(0, |f| f.generation)
    }

    fn has_value(&self, key: &CacheKey) -> bool {
        match key {
            CacheKey::Notifications => false,
            CacheKey::Conversations => self.conversations.is_some(),
            CacheKey::Messages(id) => self.threads.contains_key(id),
            CacheKey::Resolution(user) => self.resolutions.contains_key(user),
        }
    }

    fn begin(&mut self, key: &CacheKey) -> u64 {
        let fetch = self.fetching.entry(key.clone()).or_default();
        fetch.count += 1;
        fetch.generation
    }

    fn end(&mut self, key: &CacheKey) {
        if let Some(fetch) = self.fetching.get_mut(key) {
            fetch.count = fetch.count.saturating_sub(1);
            if fetch.count == 0 {
                self.fetching.remove(key);
            }
        }
    }

    /// Returns true when the invalidation should be announced: the key went
    /// from fresh to stale, or it belongs to a cache this store does not hold.
    fn mark_stale(&mut self, key: CacheKey) -> bool {
        let in_flight = match self.fetching.get_mut(&key) {
            Some(fetch) => {
                fetch.generation += 1;
                true
            }
            None => false,
        };
        if in_flight || self.has_value(&key) {
            self.stale.insert(key)
        } else {
            !matches!(key, CacheKey::Messages(_) | CacheKey::Resolution(_))
        }
    }

    /// A fetch that started before a later invalidation must not clear it.
    fn settle(&mut self, key: &CacheKey, started_at: u64) {
        if self.generation(key) == started_at {
            self.stale.remove(key);
        }
    }

    fn message_keys(&self) -> Vec<CacheKey> {
        let cached = self.threads.keys().map(|id| CacheKey::Messages(id.clone()));
        let pending = self
            .fetching
            .keys()
            .filter(|k| matches!(k, CacheKey::Messages(id) if !self.threads.contains_key(id)))
            .cloned();
        cached.chain(pending).collect()
    }
}

/// Registered for the length of one backend fetch. Dropping it, including
/// when the fetch fails or is cancelled, ends the registration.
struct Fetch<'a> {
    state: &'a Mutex<CacheState>,
    key: CacheKey,
    started_at: u64,
}

impl Drop for Fetch<'_> {
    fn drop(&mut self) {
        lock(self.state).end(&self.key);
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ConversationStore<B: ChatBackend> {
    backend: B,
    state: Mutex<CacheState>,
    changes: broadcast::Sender<CacheKey>,
}

impl<B: ChatBackend> ConversationStore<B> {
    pub fn new(backend: B) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            backend,
            state: Mutex::new(CacheState::default()),
            changes,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        lock(&self.state)
    }

    fn begin(&self, state: &mut CacheState, key: CacheKey) -> Fetch<'_> {
        let started_at = state.begin(&key);
        Fetch {
            state: &self.state,
            key,
            started_at,
        }
    }

    /// Keys are announced once per fresh-to-stale transition.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.changes.subscribe()
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.state().stale.contains(key)
    }

    /// Whatever is cached for the list, stale or not, without fetching.
    pub fn cached_conversations(&self) -> Option<Vec<Conversation>> {
        self.state().conversations.clone()
    }

    pub fn cached_conversation(&self, id: &str) -> Option<ConversationPage> {
        self.state().threads.get(id).cloned()
    }

    /// Drop a cached thread, e.g. when its view is closed.
    pub fn forget_conversation(&self, id: &str) {
        let mut state = self.state();
        state.threads.remove(id);
        state.stale.remove(&CacheKey::Messages(id.to_string()));
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let fetch = {
            let mut state = self.state();
            if let Some(list) = state
                .conversations
                .as_ref()
                .filter(|_| !state.stale.contains(&CacheKey::Conversations))
            {
                return Ok(list.clone());
            }
            self.begin(&mut state, CacheKey::Conversations)
        };
        debug!("fetching conversation list");
        let list = self.backend.conversations().await?;
        let mut state = self.state();
        state.conversations = Some(list.clone());
        state.settle(&fetch.key, fetch.started_at);
        drop(state);
        Ok(list)
    }

    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        self.invalidate(CacheKey::Conversations);
        self.list_conversations().await
    }

    /// `None` id means no conversation is selected; nothing is fetched.
    pub async fn get_conversation(&self, id: Option<&str>) -> Result<Option<ConversationPage>, ChatError> {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        let key = CacheKey::Messages(id.to_string());
        let fetch = {
            let mut state = self.state();
            if !state.stale.contains(&key) {
                if let Some(page) = state.threads.get(id) {
                    return Ok(Some(page.clone()));
                }
            }
            self.begin(&mut state, key)
        };
        debug!("fetching conversation {}", id);
        let page = self.backend.conversation(id).await?;
        let mut state = self.state();
        state.threads.insert(id.to_string(), page.clone());
        state.settle(&fetch.key, fetch.started_at);
        drop(state);
        Ok(Some(page))
    }

    /// Find or create the conversation with `user_id`. The caller navigates
    /// to the returned id. Nothing is touched when the backend call fails.
    pub async fn resolve_or_create_conversation(&self, user_id: &str) -> Result<String, ChatError> {
        let key = CacheKey::Resolution(user_id.to_string());
        let cached = {
            let mut state = self.state();
            match state.resolutions.get(user_id).filter(|_| !state.stale.contains(&key)) {
                Some(id) => Ok(id.clone()),
                None => Err(self.begin(&mut state, key)),
            }
        };
        let id = match cached {
            Ok(id) => id,
            Err(fetch) => {
                let id = self.backend.resolve_conversation(user_id).await.inspect_err(|e| {
                    warn!("could not open conversation with user {}: {e}", user_id);
                })?;
                let mut state = self.state();
                state.resolutions.insert(user_id.to_string(), id.clone());
                state.settle(&fetch.key, fetch.started_at);
                id
            }
        };
        self.invalidate(CacheKey::Conversations);
        info!("conversation with user {} is {}", user_id, id);
        Ok(id)
    }

    /// Post one message. On success the thread and the list (its last
    /// message changed) go stale; on failure caches are left alone.
    pub async fn send(&self, conversation_id: &str, message: OutgoingMessage) -> Result<(), ChatError> {
        self.backend
            .send_message(conversation_id, message)
            .await
            .inspect_err(|e| warn!("send to conversation {} failed: {e}", conversation_id))?;
        self.invalidate(CacheKey::Messages(conversation_id.to_string()));
        self.invalidate(CacheKey::Conversations);
        Ok(())
    }

    /// Post messages in order, stopping at the first failure. The error
    /// says how many went out before it; those have already invalidated
    /// their keys.
    pub async fn send_all(
        &self,
        conversation_id: &str,
        messages: Vec<OutgoingMessage>,
    ) -> Result<(), PartialSend<ChatError>> {
        for (delivered, message) in messages.into_iter().enumerate() {
            self.send(conversation_id, message)
                .await
                .map_err(|error| PartialSend { delivered, error })?;
        }
        Ok(())
    }
}

impl<B: ChatBackend> Invalidate for ConversationStore<B> {
    fn invalidate(&self, key: CacheKey) {
        let announce = self.state().mark_stale(key.clone());
        if announce {
            debug!("cache key {:?} is stale", key);
            let _ = self.changes.send(key);
        }
    }

    /// Covers cached threads and threads whose first fetch is still running.
    fn invalidate_all_messages(&self) {
        let keys = self.state().message_keys();
        for key in keys {
            self.invalidate(key);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::models::{Message, MessagePayload};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// In-memory backend that counts calls and can be switched to failing.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub list_calls: AtomicUsize,
        pub page_calls: AtomicUsize,
        pub resolve_calls: AtomicUsize,
        pub sent: Mutex<Vec<(String, OutgoingMessage)>>,
        pub fail: AtomicBool,
        /// Fail once when this many messages have been accepted.
        pub fail_send_at: Mutex<Option<usize>>,
        /// Held by the next page fetch until notified.
        pub page_gate: Mutex<Option<Arc<Notify>>>,
    }

    impl FakeBackend {
        pub fn failing() -> Self {
            let backend = Self::default();
            backend.fail.store(true, Ordering::SeqCst);
            backend
        }

        fn check(&self) -> Result<(), ChatError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ChatError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    pub(crate) fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            participants: Vec::new(),
            last_message: None,
            unread_count: 0,
            updated_at: None,
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn conversations(&self) -> Result<Vec<Conversation>, ChatError> {
            self.check()?;
            let n = self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..=n).map(|i| conversation(&i.to_string())).collect())
        }

        async fn conversation(&self, id: &str) -> Result<ConversationPage, ChatError> {
            self.check()?;
            let version = self.page_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.page_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            Ok(ConversationPage {
                conversation: conversation(id),
                messages: vec![Message {
                    id: format!("{id}-v{version}"),
                    conversation_id: Some(id.into()),
                    sender_id: "2".into(),
                    sender_name: "Ana".into(),
                    sender_image: None,
                    created_at: None,
                    payload: MessagePayload::Text("hi".into()),
                }],
            })
        }

        async fn resolve_conversation(&self, user_id: &str) -> Result<String, ChatError> {
            self.check()?;
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("conv-{user_id}"))
        }

        async fn send_message(&self, conversation_id: &str, message: OutgoingMessage) -> Result<(), ChatError> {
            self.check()?;
            {
                let mut fail_at = self.fail_send_at.lock().unwrap();
                if *fail_at == Some(self.sent.lock().unwrap().len()) {
                    *fail_at = None;
                    return Err(ChatError::Status(500));
                }
            }
            self.sent.lock().unwrap().push((conversation_id.to_string(), message));
            Ok(())
        }
    }

    #[tokio::test]
    async fn list_is_cached_until_invalidated() {
        let store = ConversationStore::new(FakeBackend::default());
        let first = store.list_conversations().await.unwrap();
        let again = store.list_conversations().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.backend().list_calls.load(Ordering::SeqCst), 1);

        store.invalidate(CacheKey::Conversations);
        let refreshed = store.list_conversations().await.unwrap();
        assert_eq!(refreshed.len(), 2);
        assert!(!store.is_stale(&CacheKey::Conversations));
    }

    #[tokio::test]
    async fn repeated_invalidation_is_one_refetch() {
        let store = ConversationStore::new(FakeBackend::default());
        let mut feed = store.subscribe();
        let before = store.list_conversations().await.unwrap();
        for _ in 0..5 {
            store.invalidate(CacheKey::Conversations);
        }
        assert_eq!(store.cached_conversations(), Some(before));
        assert_eq!(feed.try_recv().unwrap(), CacheKey::Conversations);
        assert!(feed.try_recv().is_err());

        store.list_conversations().await.unwrap();
        store.list_conversations().await.unwrap();
        assert_eq!(store.backend().list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn absent_id_does_not_fetch() {
        let store = ConversationStore::new(FakeBackend::default());
        assert_eq!(store.get_conversation(None).await.unwrap(), None);
        assert_eq!(store.get_conversation(Some("")).await.unwrap(), None);
        assert_eq!(store.backend().page_calls.load(Ordering::SeqCst), 0);

        let page = store.get_conversation(Some("7")).await.unwrap().unwrap();
        assert_eq!(page.conversation.id, "7");
        store.get_conversation(Some("7")).await.unwrap();
        assert_eq!(store.backend().page_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_marks_list_stale() {
        let store = ConversationStore::new(FakeBackend::default());
        store.list_conversations().await.unwrap();
        let id = store.resolve_or_create_conversation("12").await.unwrap();
        assert_eq!(id, "conv-12");
        assert!(store.is_stale(&CacheKey::Conversations));
    }

    #[tokio::test]
    async fn failed_resolve_leaves_list_untouched() {
        let store = ConversationStore::new(FakeBackend::default());
        let list = store.list_conversations().await.unwrap();
        store.backend().fail.store(true, Ordering::SeqCst);
        assert!(store.resolve_or_create_conversation("12").await.is_err());
        assert!(!store.is_stale(&CacheKey::Conversations));
        assert_eq!(store.cached_conversations(), Some(list));
    }

    #[tokio::test]
    async fn send_invalidates_thread_and_list() {
        let store = ConversationStore::new(FakeBackend::default());
        store.list_conversations().await.unwrap();
        store.get_conversation(Some("3")).await.unwrap();
        store.send("3", OutgoingMessage::Text("hello".into())).await.unwrap();
        assert!(store.is_stale(&CacheKey::Conversations));
        assert!(store.is_stale(&CacheKey::Messages("3".into())));
        assert_eq!(store.backend().sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_caches_fresh() {
        let store = ConversationStore::new(FakeBackend::default());
        store.list_conversations().await.unwrap();
        store.get_conversation(Some("3")).await.unwrap();
        store.backend().fail.store(true, Ordering::SeqCst);
        assert!(store.send("3", OutgoingMessage::Text("hello".into())).await.is_err());
        assert!(!store.is_stale(&CacheKey::Conversations));
        assert!(!store.is_stale(&CacheKey::Messages("3".into())));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_value_and_staleness() {
        let store = ConversationStore::new(FakeBackend::default());
        let list = store.list_conversations().await.unwrap();
        store.invalidate(CacheKey::Conversations);
        store.backend().fail.store(true, Ordering::SeqCst);
        assert!(store.list_conversations().await.is_err());
        assert!(store.is_stale(&CacheKey::Conversations));
        assert_eq!(store.cached_conversations(), Some(list));
    }

    #[tokio::test]
    async fn invalidate_all_messages_covers_cached_threads() {
        let store = ConversationStore::new(FakeBackend::default());
        store.get_conversation(Some("1")).await.unwrap();
        store.get_conversation(Some("2")).await.unwrap();
        store.invalidate_all_messages();
        assert!(store.is_stale(&CacheKey::Messages("1".into())));
        assert!(store.is_stale(&CacheKey::Messages("2".into())));
    }

    #[test]
    fn invalidation_during_fetch_survives_settle() {
        let mut state = CacheState::default();
        let key = CacheKey::Conversations;
        state.conversations = Some(Vec::new());
        let started_at = state.begin(&key);
        state.mark_stale(key.clone());
        state.settle(&key, started_at);
        state.end(&key);
        assert!(state.stale.contains(&key));

        let started_at = state.begin(&key);
        state.settle(&key, started_at);
        state.end(&key);
        assert!(!state.stale.contains(&key));
        assert!(state.fetching.is_empty());
    }

    #[tokio::test]
    async fn push_during_first_thread_fetch_forces_refetch() {
        let store = Arc::new(ConversationStore::new(FakeBackend::default()));
        let gate = Arc::new(Notify::new());
        *store.backend().page_gate.lock().unwrap() = Some(gate.clone());

        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.get_conversation(Some("5")).await })
        };
        while store.backend().page_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        store.invalidate_all_messages();
        gate.notify_one();

        let first = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(first.messages[0].id, "5-v0");
        assert!(store.is_stale(&CacheKey::Messages("5".into())));

        let next = store.get_conversation(Some("5")).await.unwrap().unwrap();
        assert_eq!(next.messages[0].id, "5-v1");
        assert_eq!(store.backend().page_calls.load(Ordering::SeqCst), 2);
        assert!(!store.is_stale(&CacheKey::Messages("5".into())));
    }

    #[tokio::test]
    async fn uncached_keys_are_not_tracked() {
        let store = ConversationStore::new(FakeBackend::default());
        let mut feed = store.subscribe();
        store.invalidate(CacheKey::Messages("9".into()));
        store.invalidate(CacheKey::Resolution("4".into()));
        assert!(!store.is_stale(&CacheKey::Messages("9".into())));
        assert!(feed.try_recv().is_err());
        assert!(store.state().stale.is_empty());

        store.invalidate(CacheKey::Notifications);
        assert_eq!(feed.try_recv().unwrap(), CacheKey::Notifications);

        store.backend().fail.store(true, Ordering::SeqCst);
        assert!(store.get_conversation(Some("9")).await.is_err());
        assert!(store.state().fetching.is_empty());
    }

    #[tokio::test]
    async fn forgotten_thread_is_fetched_again() {
        let store = ConversationStore::new(FakeBackend::default());
        store.get_conversation(Some("2")).await.unwrap();
        store.invalidate(CacheKey::Messages("2".into()));
        store.forget_conversation("2");
        assert_eq!(store.cached_conversation("2"), None);
        assert!(!store.is_stale(&CacheKey::Messages("2".into())));
        store.get_conversation(Some("2")).await.unwrap();
        assert_eq!(store.backend().page_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_all_reports_how_many_went_out() {
        let store = ConversationStore::new(FakeBackend::default());
        *store.backend().fail_send_at.lock().unwrap() = Some(1);
        let messages = vec![
            OutgoingMessage::Text("one".into()),
            OutgoingMessage::Text("two".into()),
            OutgoingMessage::Text("three".into()),
        ];
        let err = store.send_all("3", messages).await.unwrap_err();
        assert_eq!(err.delivered, 1);
        assert!(matches!(err.error, ChatError::Status(500)));
        assert_eq!(store.backend().sent.lock().unwrap().len(), 1);
    }
}
