//! Live message window, backward pagination, send and read sweep for 1:1 conversations.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parley_store_traits::{
    ChangeKind, Clock, Cursor, Direction, DocumentStore, DocumentWrite, ListenerRegistration,
    Query, QuerySnapshot, StoreError, WriteOp,
};
use serde_json::Value;

use crate::chat_id::conversation_id;
use crate::coalesce::FreshnessCache;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::listener::ChannelListener;
use crate::model::{Message, MessageId, ReplyRef, SortKey};
use crate::paths;
use crate::presence::PresenceSync;
use crate::rate_limit::{admit, AdmissionControl};
use crate::registry::ListenerRegistry;

const ORDER_FIELD: &str = "timestamp";
/// Fresh ids tried when a send collides with an existing message.
const MAX_ID_ATTEMPTS: usize = 8;

/// Everything currently known about one conversation, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub chat_id: String,
    pub messages: Vec<Message>,
    /// False once `load_older` has reached the start of the conversation.
    pub has_older: bool,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    Messages(ConversationSnapshot),
    Failed { chat_id: String, error: SyncError },
}

pub type ConversationCallback = Box<dyn FnMut(ConversationEvent) + Send>;

/// One observer of an open conversation. Closing it releases its reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationHandle {
    chat_id: String,
    observer: u64,
}

impl ConversationHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OlderPage {
    /// Older messages, oldest first. Never overlaps a previous page.
    Loaded(Vec<Message>),
    /// The start of the conversation was reached. Reported once.
    ReachedStart,
    /// Nothing left to load; the call did nothing.
    Exhausted,
    /// The live window has not delivered yet, so there is no cursor.
    NotReady,
}

/// Send-time ids that strictly increase even when the clock does not.
///
/// Uniqueness across clients comes from the create-only write in `send`.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: u64,
}

impl MessageIdGenerator {
    pub fn next(&mut self, now_ms: i64) -> MessageId {
        let now = u64::try_from(now_ms).unwrap_or(0);
        self.last = now.max(self.last + 1);
        MessageId(self.last)
    }
}

struct OpenConversation {
    generation: u64,
    _registration: ListenerRegistration,
    observers: BTreeMap<u64, ConversationCallback>,
    messages: BTreeMap<MessageId, Message>,
    /// Oldest document fetched so far, with its sort key.
    cursor: Option<(Cursor, SortKey)>,
    received: bool,
    exhausted: bool,
    from_cache: bool,
}

impl OpenConversation {
    fn snapshot(&self, chat_id: &str) -> ConversationSnapshot {
        let mut messages: Vec<Message> = self.messages.values().cloned().collect();
        messages.sort_by_key(Message::sort_key);
        ConversationSnapshot {
            chat_id: chat_id.to_string(),
            messages,
            has_older: !self.exhausted,
            from_cache: self.from_cache,
        }
    }

    fn deliver(&mut self, chat_id: &str) -> usize {
        let snapshot = self.snapshot(chat_id);
        for callback in self.observers.values_mut() {
            callback(ConversationEvent::Messages(snapshot.clone()));
        }
        self.observers.len()
    }

    fn advance_cursor(&mut self, snapshot: &QuerySnapshot) {
        let oldest = snapshot
            .docs
            .iter()
            .filter_map(|d| Some((Cursor::from_document(d, ORDER_FIELD)?, Message::from_snapshot(d)?)))
            .min_by_key(|(_, m)| m.sort_key());
        if let Some((cursor, msg)) = oldest {
            let key = msg.sort_key();
            if self.cursor.as_ref().map_or(true, |(_, k)| key < *k) {
                self.cursor = Some((cursor, key));
            }
        }
    }

    /// Merges a live window into the known messages. Returns whether anything changed.
    fn apply_window(&mut self, snapshot: &QuerySnapshot) -> bool {
        let before = self.messages.clone();
        self.received = true;
        self.from_cache = snapshot.from_cache;

        if snapshot.docs.is_empty() {
            // The whole conversation is gone.
            self.messages.clear();
            self.cursor = None;
            return before != self.messages;
        }

        let window: Vec<Message> = snapshot.docs.iter().filter_map(Message::from_snapshot).collect();
        if let Some(oldest) = window.iter().map(Message::sort_key).min() {
            let removed: HashSet<MessageId> = snapshot
                .changes
                .iter()
                .filter(|c| c.kind == ChangeKind::Removed)
                .filter_map(|c| c.id.parse().ok())
                .collect();
            // Docs that left the window but sort before its oldest member were
            // pushed out by newer messages; the rest were deleted.
            self.messages
                .retain(|id, m| !removed.contains(id) || m.sort_key() < oldest);
        }
        for message in window {
            self.messages.insert(message.id, message);
        }
        self.advance_cursor(snapshot);
        before != self.messages
    }
}

enum SignalKind {
    Snapshot(Result<QuerySnapshot, StoreError>),
    Refresh,
}

struct Signal {
    chat_id: String,
    generation: u64,
    kind: SignalKind,
}

pub struct ConversationSync {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    limiter: Arc<dyn AdmissionControl>,
    page_limit: usize,
    open: ListenerRegistry<String, OpenConversation>,
    freshness: FreshnessCache<String>,
    ids: MessageIdGenerator,
    next_generation: u64,
    next_observer: u64,
    tx: flume::Sender<Signal>,
    rx: flume::Receiver<Signal>,
}

impl ConversationSync {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        limiter: Arc<dyn AdmissionControl>,
        config: &SyncConfig,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            store,
            freshness: FreshnessCache::new(clock.clone(), config.freshness_ttl_ms),
            clock,
            limiter,
            page_limit: config.message_page_limit,
            open: ListenerRegistry::new(),
            ids: MessageIdGenerator::default(),
            next_generation: 0,
            next_observer: 0,
            tx,
            rx,
        }
    }

    fn window_query(&self, chat_id: &str) -> Query {
        Query::collection(paths::messages(chat_id))
            .order_by(ORDER_FIELD, Direction::Descending)
            .limit(self.page_limit)
    }

    /// Opens `chat_id`, or joins the subscription that is already open.
    ///
    /// Joining never creates a second live query: it resets the
    /// conversation's freshness marker and schedules a one-shot refresh.
    pub fn open(
        &mut self,
        chat_id: &str,
        callback: impl FnMut(ConversationEvent) + Send + 'static,
    ) -> Result<ConversationHandle, SyncError> {
        let key = chat_id.to_string();
        let generation = self.next_generation + 1;
        let query = self.window_query(chat_id);
        let store = self.store.clone();
        let tx = self.tx.clone();
        let created = self.open.acquire(&key, || -> Result<_, SyncError> {
            let chat = key.clone();
            let listener = ChannelListener::new(tx, move |result| Signal {
                chat_id: chat.clone(),
                generation,
                kind: SignalKind::Snapshot(result),
            });
            let registration = store.subscribe(query, Arc::new(listener))?;
            Ok(OpenConversation {
                generation,
                _registration: registration,
                observers: BTreeMap::new(),
                messages: BTreeMap::new(),
                cursor: None,
                received: false,
                exhausted: false,
                from_cache: false,
            })
        })?;

        self.next_observer += 1;
        let observer = self.next_observer;
        let Some(conv) = self.open.get_mut(&key) else {
            return Err(SyncError::Failed(format!("conversation {chat_id} vanished")));
        };
        conv.observers.insert(observer, Box::new(callback));

        let live_generation = conv.generation;

        if created {
            self.next_generation = generation;
            tracing::info!(chat_id, "conversation opened");
        } else {
            tracing::debug!(chat_id, refs = self.open.refs(&key), "conversation reused");
            self.freshness.reset(chat_id);
            let _ = self.tx.send(Signal {
                chat_id: key.clone(),
                generation: live_generation,
                kind: SignalKind::Refresh,
            });
        }
        Ok(ConversationHandle {
            chat_id: key,
            observer,
        })
    }

    /// Releases `handle`. The live query stops once its last observer closes.
    /// Closing twice is a no-op.
    pub fn close(&mut self, handle: &ConversationHandle) {
        let Some(conv) = self.open.get_mut(&handle.chat_id) else {
            return;
        };
        if conv.observers.remove(&handle.observer).is_none() {
            return;
        }
        if self.open.release(&handle.chat_id).is_some() {
            self.freshness.reset(handle.chat_id.as_str());
            tracing::info!(chat_id = %handle.chat_id, "conversation closed");
        }
    }

    /// Releases every conversation, e.g. at sign-out.
    pub fn close_all(&mut self) {
        let closed = self.open.clear().len();
        self.freshness.clear();
        if closed > 0 {
            tracing::info!(closed, "all conversations closed");
        }
    }

    pub fn is_open(&self, chat_id: &str) -> bool {
        self.open.contains(&chat_id.to_string())
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn observer_count(&self, chat_id: &str) -> usize {
        self.open.refs(&chat_id.to_string())
    }

    pub fn snapshot(&self, chat_id: &str) -> Option<ConversationSnapshot> {
        self.open
            .get(&chat_id.to_string())
            .filter(|c| c.received)
            .map(|c| c.snapshot(chat_id))
    }

    /// Forces the next unchanged snapshot of `chat_id` through.
    pub fn reset_freshness(&mut self, chat_id: &str) {
        self.freshness.reset(chat_id);
    }

    /// Applies queued store notifications and delivers them to observers.
    /// Returns the number of callbacks invoked.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(signal) = self.rx.try_recv() {
            let key = signal.chat_id;
            let Some(conv) = self.open.get_mut(&key) else {
                continue;
            };
            if conv.generation != signal.generation {
                continue;
            }
            match signal.kind {
                SignalKind::Snapshot(Ok(snapshot)) => {
                    let changed = conv.apply_window(&snapshot);
                    let fresh = self.freshness.check(key.clone());
                    if changed || fresh {
                        delivered += conv.deliver(&key);
                    } else {
                        tracing::trace!(chat_id = %key, "unchanged window skipped");
                    }
                }
                SignalKind::Refresh => {
                    if conv.received {
                        self.freshness.check(key.clone());
                        delivered += conv.deliver(&key);
                    }
                }
                SignalKind::Snapshot(Err(e)) => {
                    tracing::warn!(chat_id = %key, %e, "message listener failed");
                    let error = SyncError::listener(e);
                    if let Some(mut conv) = self.open.remove(&key) {
                        for callback in conv.observers.values_mut() {
                            callback(ConversationEvent::Failed {
                                chat_id: key.clone(),
                                error: error.clone(),
                            });
                            delivered += 1;
                        }
                    }
                }
            }
        }
        delivered
    }

    /// Loads the page before the oldest message fetched so far.
    ///
    /// Reads the local cache first and only goes to the network when the
    /// cache cannot fill a whole page.
    pub fn load_older(&mut self, chat_id: &str) -> Result<OlderPage, SyncError> {
        let key = chat_id.to_string();
        let Some(conv) = self.open.get(&key) else {
            return Err(SyncError::NotFound(format!("conversation {chat_id} is not open")));
        };
        if conv.exhausted {
            return Ok(OlderPage::Exhausted);
        }
        if !conv.received {
            return Ok(OlderPage::NotReady);
        }
        let page = match &conv.cursor {
            None => QuerySnapshot::default(),
            Some((cursor, _)) => {
                let query = self.window_query(chat_id).start_after(cursor.clone());
                self.fetch_page(&query)?
            }
        };

        let Some(conv) = self.open.get_mut(&key) else {
            return Ok(OlderPage::Exhausted);
        };
        if page.is_empty() {
            conv.exhausted = true;
            tracing::debug!(chat_id, "reached conversation start");
            conv.deliver(chat_id);
            return Ok(OlderPage::ReachedStart);
        }

        let mut older: Vec<Message> = page.docs.iter().filter_map(Message::from_snapshot).collect();
        older.retain(|m| !conv.messages.contains_key(&m.id));
        older.sort_by_key(Message::sort_key);
        for message in &older {
            conv.messages.insert(message.id, message.clone());
        }
        conv.advance_cursor(&page);
        tracing::debug!(chat_id, count = older.len(), from_cache = page.from_cache, "older page");
        conv.deliver(chat_id);
        Ok(OlderPage::Loaded(older))
    }

    fn fetch_page(&self, query: &Query) -> Result<QuerySnapshot, StoreError> {
        let cached = self.store.query_from_cache(query).ok();
        if let Some(page) = &cached {
            if page.len() >= self.page_limit {
                return Ok(page.clone());
            }
        }
        match self.store.query(query) {
            Ok(page) => Ok(page),
            Err(e) => match cached {
                Some(page) if !page.is_empty() => {
                    tracing::debug!(%e, "older page served from cache");
                    Ok(page)
                }
                _ => Err(e),
            },
        }
    }

    /// Appends a message from `sender_id` to `receiver_id`.
    ///
    /// The sender's typing mark is cleared before the write. The send is
    /// refused with `RateLimited` when the sender exceeds the message quota.
    pub fn send(
        &mut self,
        sender_id: &str,
        receiver_id: &str,
        text: &str,
        reply_to: Option<ReplyRef>,
        presence: &mut PresenceSync,
    ) -> Result<MessageId, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::Validation("message is empty".into()));
        }
        let chat_id = conversation_id(sender_id, receiver_id);
        if let Err(e) = presence.clear(&chat_id, sender_id) {
            tracing::warn!(%chat_id, %e, "failed to clear typing before send");
        }
        admit(self.limiter.as_ref(), sender_id)?;

        let reply = match reply_to {
            Some(r) => serde_json::to_value(r).map_err(|e| SyncError::Failed(e.to_string()))?,
            None => Value::Null,
        };
        let write = DocumentWrite::new()
            .set("senderId", sender_id)
            .set("text", text)
            .server_timestamp("timestamp")
            .set("read", false)
            .set("replyTo", reply);

        // The peer may have taken the same millisecond; move past it.
        let mut attempts = 0;
        let id = loop {
            let id = self.ids.next(self.clock.now_millis());
            match self.store.create(&paths::message(&chat_id, id), write.clone()) {
                Ok(()) => break id,
                Err(StoreError::AlreadyExists(_)) if attempts < MAX_ID_ATTEMPTS => {
                    attempts += 1;
                    tracing::debug!(%chat_id, message_id = %id, "message id taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.freshness.reset(chat_id.as_str());
        tracing::info!(%chat_id, message_id = %id, "message sent");
        Ok(id)
    }

    /// Flips `read` on every unread message of `chat_id` not sent by
    /// `reader_id`, in one batch. Returns how many were flipped.
    pub fn mark_read(&self, chat_id: &str, reader_id: &str) -> Result<usize, SyncError> {
        let unread = self
            .store
            .query(&Query::collection(paths::messages(chat_id)).where_eq("read", false))?;
        let ops: Vec<WriteOp> = unread
            .docs
            .iter()
            .filter(|d| d.get_str("senderId") != Some(reader_id))
            .map(|d| WriteOp::update(d.path.clone(), DocumentWrite::new().set("read", true)))
            .collect();
        let count = ops.len();
        if count == 0 {
            return Ok(0);
        }
        self.store.batch_write(ops)?;
        tracing::debug!(chat_id, count, "marked read");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase() {
        let mut ids = MessageIdGenerator::default();
        assert_eq!(ids.next(1_000), MessageId(1_000));
        assert_eq!(ids.next(1_000), MessageId(1_001));
        assert_eq!(ids.next(999), MessageId(1_002));
        assert_eq!(ids.next(5_000), MessageId(5_000));
    }
}
