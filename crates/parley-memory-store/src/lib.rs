//! Memory-based document store for parley.
//!
//! A [`MemoryBackend`] plays the part of the hosted database: it owns the
//! documents, the registered live queries and a queue of pending listener
//! notifications. Each [`MemoryStore`] obtained from [`MemoryBackend::client`]
//! plays the part of one client SDK instance, with its own local cache and an
//! offline switch.
//!
//! ## Delivery model
//!
//! Live queries are re-evaluated after every committed write and, if their
//! result set changed, a snapshot is queued. Nothing is delivered until
//! [`MemoryBackend::flush`] runs, which drains the queue on the caller's
//! thread. This keeps listener callbacks out of store locks and makes the
//! interleaving of writes and deliveries explicit in tests:
//!
//! ```rust
//! use std::sync::Arc;
//! use parley_memory_store::MemoryBackend;
//! use parley_store_traits::{DocumentStore, DocumentWrite, ManualClock};
//!
//! let backend = MemoryBackend::new(Arc::new(ManualClock::new(0)));
//! let alice = backend.client("alice");
//! alice
//!     .set("users/a1", DocumentWrite::new().set("displayName", "@alice"))
//!     .unwrap();
//! backend.flush();
//! assert!(backend.document("users/a1").is_some());
//! ```
//!
//! ## Cache semantics
//!
//! A client's cache holds every document it read, wrote or received through a
//! live query, bounded by an LRU. Collection queries can be answered from
//! cache once the collection has been queried over the network (or covered by
//! a live query); otherwise they fail with [`StoreError::CacheMiss`]. Offline
//! clients keep answering cache reads and fail everything else with
//! [`StoreError::Unavailable`].

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use parley_store_traits::document::{
    parent_collection, validate_collection_path, validate_document_path,
};
use parley_store_traits::{
    ChangeKind, Clock, DocumentSnapshot, DocumentStore, Fields, ListenerRegistration, Query,
    QueryListener, QuerySnapshot, StoreError, WriteOp,
};

mod cache;
mod listeners;

use self::cache::ClientCache;
use self::listeners::{diff, ListenerEntry, Listeners, Notification, Payload};

/// Default number of documents each client cache keeps.
const DEFAULT_DOCUMENT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(v) => v,
    None => panic!("cache size must be non-zero"),
};

/// Default number of collections each client cache remembers as fetched.
const DEFAULT_COLLECTION_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(v) => v,
    None => panic!("cache size must be non-zero"),
};

/// Size limits for client caches.
///
/// ```rust
/// use parley_memory_store::CacheLimits;
///
/// let limits = CacheLimits::default()
///     .with_document_cache_size(50)
///     .with_collection_cache_size(5);
/// assert_eq!(limits.documents, 50);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    /// Maximum documents per client cache
    pub documents: usize,
    /// Maximum collections per client cache
    pub collections: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            documents: DEFAULT_DOCUMENT_CACHE_SIZE.get(),
            collections: DEFAULT_COLLECTION_CACHE_SIZE.get(),
        }
    }
}

impl CacheLimits {
    /// Sets the maximum number of cached documents.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn with_document_cache_size(mut self, size: usize) -> Self {
        assert!(size > 0, "document cache size must be greater than 0");
        self.documents = size;
        self
    }

    /// Sets the maximum number of cached collections.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn with_collection_cache_size(mut self, size: usize) -> Self {
        assert!(size > 0, "collection cache size must be greater than 0");
        self.collections = size;
        self
    }

    fn new_cache(&self) -> ClientCache {
        ClientCache::new(
            NonZeroUsize::new(self.documents).unwrap_or(DEFAULT_DOCUMENT_CACHE_SIZE),
            NonZeroUsize::new(self.collections).unwrap_or(DEFAULT_COLLECTION_CACHE_SIZE),
        )
    }
}

pub(crate) struct ClientState {
    id: u64,
    name: String,
    offline: AtomicBool,
    cache: Mutex<ClientCache>,
}

impl ClientState {
    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

struct Backend {
    clock: Arc<dyn Clock>,
    limits: CacheLimits,
    docs: RwLock<BTreeMap<String, Fields>>,
    listeners: Mutex<Listeners>,
    failure: Mutex<Option<StoreError>>,
    next_id: AtomicU64,
}

pub(crate) fn snapshot_from_rows(
    collection: &str,
    rows: Vec<(String, Fields)>,
    from_cache: bool,
) -> QuerySnapshot {
    QuerySnapshot {
        docs: rows
            .into_iter()
            .map(|(id, fields)| {
                DocumentSnapshot::new(format!("{collection}/{id}"), Some(fields), from_cache)
            })
            .collect(),
        changes: Vec::new(),
        from_cache,
    }
}

fn run_query(docs: &BTreeMap<String, Fields>, query: &Query) -> Vec<(String, Fields)> {
    let prefix = format!("{}/", query.collection);
    let candidates: Vec<(&str, &Fields)> = docs
        .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
        .take_while(|(path, _)| path.starts_with(&prefix))
        .filter_map(|(path, fields)| {
            let id = path.strip_prefix(&prefix)?;
            (!id.contains('/')).then_some((id, fields))
        })
        .collect();
    query.evaluate(candidates)
}

impl Backend {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Recomputes one live query and queues a snapshot if its result set changed.
    fn refresh(
        id: u64,
        entry: &mut ListenerEntry,
        docs: &BTreeMap<String, Fields>,
        listeners_queue: &mut VecDeque<Notification>,
    ) {
        let rows = run_query(docs, &entry.query);
        if entry.last.as_deref() == Some(rows.as_slice()) {
            return;
        }
        let changes = diff(entry.last.as_deref(), &rows);
        {
            let mut cache = entry.client.cache.lock();
            cache.record_query(&entry.query.collection, &rows);
            for change in changes.iter().filter(|c| c.kind == ChangeKind::Removed) {
                let path = format!("{}/{}", entry.query.collection, change.id);
                if !docs.contains_key(&path) {
                    cache.record(&path, None);
                }
            }
        }
        let mut snapshot = snapshot_from_rows(&entry.query.collection, rows.clone(), false);
        snapshot.changes = changes;
        entry.last = Some(rows);
        listeners_queue.push_back(Notification {
            listener_id: id,
            alive: entry.alive.clone(),
            listener: entry.listener.clone(),
            payload: Payload::Snapshot(snapshot),
        });
    }

    fn reevaluate(&self, wanted: impl Fn(&ListenerEntry) -> bool) {
        let docs = self.docs.read();
        let mut guard = self.listeners.lock();
        let Listeners { entries, queue } = &mut *guard;
        let mut ids: Vec<u64> = entries
            .iter()
            .filter(|(_, e)| !e.client.is_offline() && wanted(e))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(entry) = entries.get_mut(&id) {
                Self::refresh(id, entry, &docs, queue);
            }
        }
    }

    fn commit(&self, ops: Vec<WriteOp>, client: Option<&ClientState>) -> Result<(), StoreError> {
        for op in &ops {
            validate_document_path(op.path())?;
        }
        if let Some(err) = self.failure.lock().take() {
            tracing::debug!(%err, "injected write failure");
            return Err(err);
        }

        let now = self.clock.now_millis();
        let op_count = ops.len();
        let mut written: Vec<(String, Option<Fields>)> = Vec::new();
        {
            let mut docs = self.docs.write();
            let mut staged: Vec<(String, Option<Fields>)> = Vec::new();
            for op in ops {
                let path = op.path().to_string();
                let current = match staged.iter().rev().find(|(p, _)| *p == path) {
                    Some((_, data)) => data.clone(),
                    None => docs.get(&path).cloned(),
                };
                let next = match op {
                    WriteOp::Set { data, .. } => {
                        let mut fields = Fields::new();
                        data.apply_to(&mut fields, now);
                        Some(fields)
                    }
                    WriteOp::Create { data, .. } => {
                        if current.is_some() {
                            return Err(StoreError::AlreadyExists(path));
                        }
                        let mut fields = Fields::new();
                        data.apply_to(&mut fields, now);
                        Some(fields)
                    }
                    WriteOp::Merge { data, .. } => {
                        let mut fields = current.unwrap_or_default();
                        data.apply_to(&mut fields, now);
                        Some(fields)
                    }
                    WriteOp::Update { data, .. } => {
                        let Some(mut fields) = current else {
                            return Err(StoreError::NotFound(path));
                        };
                        data.apply_to(&mut fields, now);
                        Some(fields)
                    }
                    WriteOp::Delete { .. } => None,
                };
                staged.retain(|(p, _)| *p != path);
                staged.push((path, next));
            }
            for (path, next) in staged {
                match &next {
                    Some(fields) => {
                        docs.insert(path.clone(), fields.clone());
                    }
                    None => {
                        docs.remove(&path);
                    }
                }
                written.push((path, next));
            }
        }

        if let Some(client) = client {
            let mut cache = client.cache.lock();
            for (path, data) in &written {
                cache.record(path, data.clone());
            }
        }
        let touched: HashSet<String> = written
            .iter()
            .map(|(path, _)| parent_collection(path).to_string())
            .collect();
        tracing::debug!(ops = op_count, collections = touched.len(), "batch committed");
        self.reevaluate(|entry| touched.contains(&entry.query.collection));
        Ok(())
    }

    fn subscribe(
        self: &Arc<Self>,
        client: &Arc<ClientState>,
        query: Query,
        listener: Arc<dyn QueryListener>,
    ) -> Result<ListenerRegistration, StoreError> {
        validate_collection_path(&query.collection)?;
        let id = self.next_id();
        let alive = Arc::new(AtomicBool::new(true));
        let mut entry = ListenerEntry {
            client: client.clone(),
            query,
            listener,
            alive: alive.clone(),
            last: None,
        };
        {
            let docs = self.docs.read();
            let mut guard = self.listeners.lock();
            if !client.is_offline() {
                Self::refresh(id, &mut entry, &docs, &mut guard.queue);
            } else if let Ok(snapshot) = client.cache.lock().query(&entry.query) {
                guard.queue.push_back(Notification {
                    listener_id: id,
                    alive,
                    listener: entry.listener.clone(),
                    payload: Payload::Snapshot(snapshot),
                });
            }
            tracing::debug!(
                listener = id,
                client = %client.name,
                collection = %entry.query.collection,
                "listener registered"
            );
            guard.entries.insert(id, entry);
        }

        let backend: Weak<Backend> = Arc::downgrade(self);
        Ok(ListenerRegistration::new(move || {
            if let Some(backend) = backend.upgrade() {
                backend.listeners.lock().remove(id);
                tracing::debug!(listener = id, "listener removed");
            }
        }))
    }
}

/// The shared "server" side of the in-memory store.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Backend>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("documents", &self.inner.docs.read().len())
            .field("listeners", &self.listener_count())
            .field("limits", &self.inner.limits)
            .finish()
    }
}

impl MemoryBackend {
    /// Creates an empty backend whose server timestamps come from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, CacheLimits::default())
    }

    pub fn with_limits(clock: Arc<dyn Clock>, limits: CacheLimits) -> Self {
        Self {
            inner: Arc::new(Backend {
                clock,
                limits,
                docs: RwLock::new(BTreeMap::new()),
                listeners: Mutex::new(Listeners::default()),
                failure: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// A new client with an empty cache.
    pub fn client(&self, name: impl Into<String>) -> MemoryStore {
        MemoryStore {
            backend: self.inner.clone(),
            client: Arc::new(ClientState {
                id: self.inner.next_id(),
                name: name.into(),
                offline: AtomicBool::new(false),
                cache: Mutex::new(self.inner.limits.new_cache()),
            }),
        }
    }

    /// Delivers queued notifications until the queue is empty.
    ///
    /// Returns the number of callbacks invoked. Notifications queued by
    /// callbacks during the flush are delivered in the same call.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.inner.listeners.lock().queue.pop_front();
            match next {
                Some(notification) => {
                    if notification.deliver() {
                        delivered += 1;
                    }
                }
                None => break,
            }
        }
        delivered
    }

    /// Number of notifications waiting for [`flush`](Self::flush).
    pub fn pending(&self) -> usize {
        self.inner.listeners.lock().queue.len()
    }

    /// Number of live queries currently registered.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }

    /// Makes the next committed write fail with `err`.
    pub fn inject_failure(&self, err: StoreError) {
        *self.inner.failure.lock() = Some(err);
    }

    /// Faults every live query on `collection`: each receives `err` once and is
    /// then detached.
    pub fn fail_listeners(&self, collection: &str, err: StoreError) {
        let mut guard = self.inner.listeners.lock();
        let Listeners { entries, queue } = &mut *guard;
        let ids: Vec<u64> = entries
            .iter()
            .filter(|(_, e)| e.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(entry) = entries.remove(&id) {
                queue.push_back(Notification {
                    listener_id: id,
                    alive: entry.alive,
                    listener: entry.listener,
                    payload: Payload::Error(err.clone()),
                });
            }
        }
    }

    /// Writes a document directly on the server, bypassing every client.
    pub fn put(&self, path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.commit(
            vec![WriteOp::set(
                path,
                parley_store_traits::DocumentWrite::from_fields(fields),
            )],
            None,
        )
    }

    /// Reads a document directly from the server.
    pub fn document(&self, path: &str) -> Option<Fields> {
        self.inner.docs.read().get(path).cloned()
    }

    /// Every document directly inside `collection`, ordered by id.
    pub fn documents_in(&self, collection: &str) -> Vec<(String, Fields)> {
        run_query(&self.inner.docs.read(), &Query::collection(collection))
    }

    pub fn now_millis(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    /// Ids of the live queries registered on `collection`.
    pub fn listeners_on(&self, collection: &str) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .inner
            .listeners
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| e.query.collection == collection)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// One client's view of a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<Backend>,
    client: Arc<ClientState>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("client", &self.client.name)
            .field("offline", &self.client.is_offline())
            .finish()
    }
}

impl MemoryStore {
    pub fn client_name(&self) -> &str {
        &self.client.name
    }

    /// Takes the client off or back on the network.
    ///
    /// Coming back online re-evaluates this client's live queries.
    pub fn set_offline(&self, offline: bool) {
        let was = self.client.offline.swap(offline, Ordering::SeqCst);
        if was == offline {
            return;
        }
        tracing::info!(client = %self.client.name, offline, "connectivity changed");
        if !offline {
            let client_id = self.client.id;
            self.backend
                .reevaluate(|entry| entry.client.id == client_id);
        }
    }

    pub fn is_offline(&self) -> bool {
        self.client.is_offline()
    }

    /// Number of existing documents in this client's cache.
    pub fn cached_document_count(&self) -> usize {
        self.client.cache.lock().document_count()
    }

    fn ensure_online(&self, what: &str) -> Result<(), StoreError> {
        if self.client.is_offline() {
            return Err(StoreError::Unavailable(format!("client offline: {what}")));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn get(&self, path: &str) -> Result<DocumentSnapshot, StoreError> {
        validate_document_path(path)?;
        self.ensure_online(path)?;
        let data = self.backend.docs.read().get(path).cloned();
        self.client.cache.lock().record(path, data.clone());
        Ok(DocumentSnapshot::new(path, data, false))
    }

    fn get_from_cache(&self, path: &str) -> Result<DocumentSnapshot, StoreError> {
        validate_document_path(path)?;
        self.client.cache.lock().get(path)
    }

    fn query(&self, query: &Query) -> Result<QuerySnapshot, StoreError> {
        validate_collection_path(&query.collection)?;
        self.ensure_online(&query.collection)?;
        let rows = run_query(&self.backend.docs.read(), query);
        self.client
            .cache
            .lock()
            .record_query(&query.collection, &rows);
        Ok(snapshot_from_rows(&query.collection, rows, false))
    }

    fn query_from_cache(&self, query: &Query) -> Result<QuerySnapshot, StoreError> {
        validate_collection_path(&query.collection)?;
        self.client.cache.lock().query(query)
    }

    fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.ensure_online("write")?;
        self.backend.commit(ops, Some(&self.client))
    }

    fn subscribe(
        &self,
        query: Query,
        listener: Arc<dyn QueryListener>,
    ) -> Result<ListenerRegistration, StoreError> {
        self.backend.subscribe(&self.client, query, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store_traits::{Direction, DocumentWrite, ManualClock};
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<QuerySnapshot>>,
        errors: Mutex<Vec<StoreError>>,
    }

    impl QueryListener for Recorder {
        fn on_snapshot(&self, snapshot: QuerySnapshot) {
            self.snapshots.lock().push(snapshot);
        }

        fn on_error(&self, error: StoreError) {
            self.errors.lock().push(error);
        }
    }

    fn backend() -> (MemoryBackend, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (MemoryBackend::new(clock.clone()), clock)
    }

    fn message(text: &str) -> DocumentWrite {
        DocumentWrite::new()
            .set("text", text)
            .server_timestamp("timestamp")
            .set("read", false)
    }

    #[test]
    fn server_timestamp_uses_backend_clock() {
        let (backend, clock) = backend();
        let store = backend.client("a");
        clock.set(42_000);
        store.set("chats/a_b/messages/1", message("hi")).unwrap();
        let doc = backend.document("chats/a_b/messages/1").unwrap();
        assert_eq!(doc["timestamp"], json!(42_000));
    }

    #[test]
    fn update_requires_existing_document() {
        let (backend, _) = backend();
        let store = backend.client("a");
        let err = store
            .update("chats/a_b/messages/1", DocumentWrite::new().set("read", true))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn create_refuses_existing_document() {
        let (backend, _) = backend();
        let a = backend.client("a");
        let b = backend.client("b");
        a.create("chats/a_b/messages/1", message("from a")).unwrap();
        let err = b
            .create("chats/a_b/messages/1", message("from b"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(backend.document("chats/a_b/messages/1").unwrap()["text"], json!("from a"));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (backend, _) = backend();
        let store = backend.client("a");
        let err = store
            .batch_write(vec![
                WriteOp::set("users/a/friends/b", DocumentWrite::new().set("status", "added")),
                WriteOp::update("users/b/friends/a", DocumentWrite::new().set("status", "added")),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(backend.document("users/a/friends/b").is_none());
    }

    #[test]
    fn later_op_in_batch_sees_earlier_one() {
        let (backend, _) = backend();
        let store = backend.client("a");
        store
            .batch_write(vec![
                WriteOp::set("users/a", DocumentWrite::new().set("n", 1)),
                WriteOp::update("users/a", DocumentWrite::new().set("m", 2)),
            ])
            .unwrap();
        assert_eq!(backend.document("users/a").unwrap()["m"], json!(2));
    }

    #[test]
    fn injected_failure_applies_once() {
        let (backend, _) = backend();
        let store = backend.client("a");
        backend.inject_failure(StoreError::PermissionDenied("rules".into()));
        assert!(store.set("users/a", DocumentWrite::new()).is_err());
        assert!(store.set("users/a", DocumentWrite::new()).is_ok());
    }

    #[test]
    fn listener_gets_initial_and_changed_snapshots_on_flush() {
        let (backend, _) = backend();
        let store = backend.client("a");
        store.set("chats/a_b/messages/1", message("one")).unwrap();

        let rec = Arc::new(Recorder::default());
        let _reg = store
            .subscribe(
                Query::collection("chats/a_b/messages").order_by("timestamp", Direction::Descending),
                rec.clone(),
            )
            .unwrap();
        assert!(rec.snapshots.lock().is_empty());
        assert_eq!(backend.flush(), 1);

        store.set("chats/a_b/messages/2", message("two")).unwrap();
        // Unrelated collections do not wake the listener.
        store.set("users/a", DocumentWrite::new()).unwrap();
        backend.flush();

        let snaps = rec.snapshots.lock();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].docs.len(), 2);
        assert_eq!(
            snaps[1].changes,
            vec![parley_store_traits::DocumentChange {
                kind: ChangeKind::Added,
                id: "2".into()
            }]
        );
    }

    #[test]
    fn identical_result_set_is_not_redelivered() {
        let (backend, _) = backend();
        let store = backend.client("a");
        store.set("users/a/friends/b", DocumentWrite::new().set("status", "added")).unwrap();
        let rec = Arc::new(Recorder::default());
        let _reg = store
            .subscribe(Query::collection("users/a/friends"), rec.clone())
            .unwrap();
        backend.flush();
        store.set("users/a/friends/b", DocumentWrite::new().set("status", "added")).unwrap();
        backend.flush();
        assert_eq!(rec.snapshots.lock().len(), 1);
    }

    #[test]
    fn removed_listener_drops_queued_notifications() {
        let (backend, _) = backend();
        let store = backend.client("a");
        let rec = Arc::new(Recorder::default());
        let mut reg = store
            .subscribe(Query::collection("users/a/friends"), rec.clone())
            .unwrap();
        store.set("users/a/friends/b", DocumentWrite::new()).unwrap();
        reg.remove();
        reg.remove();
        assert_eq!(backend.flush(), 0);
        assert_eq!(backend.listener_count(), 0);
        assert!(rec.snapshots.lock().is_empty());
    }

    #[test]
    fn offline_client_reads_cache_and_fails_network() {
        let (backend, _) = backend();
        let store = backend.client("a");
        store.set("users/a", DocumentWrite::new().set("displayName", "@a")).unwrap();
        store.set_offline(true);
        assert!(matches!(store.get("users/a"), Err(StoreError::Unavailable(_))));
        assert!(store.get_from_cache("users/a").unwrap().exists());
        assert!(matches!(
            store.set("users/a", DocumentWrite::new()),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn offline_listener_catches_up_when_back_online() {
        let (backend, _) = backend();
        let a = backend.client("a");
        let b = backend.client("b");
        let rec = Arc::new(Recorder::default());
        let _reg = b
            .subscribe(Query::collection("chats/a_b/messages"), rec.clone())
            .unwrap();
        backend.flush();
        b.set_offline(true);
        a.set("chats/a_b/messages/1", message("while away")).unwrap();
        backend.flush();
        assert_eq!(rec.snapshots.lock().len(), 1);

        b.set_offline(false);
        backend.flush();
        let snaps = rec.snapshots.lock();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].docs.len(), 1);
    }

    #[test]
    fn cache_query_follows_listener_deliveries() {
        let (backend, _) = backend();
        let a = backend.client("a");
        let b = backend.client("b");
        let q = Query::collection("chats/a_b/messages");
        assert!(matches!(b.query_from_cache(&q), Err(StoreError::CacheMiss(_))));
        let rec = Arc::new(Recorder::default());
        let _reg = b.subscribe(q.clone(), rec).unwrap();
        a.set("chats/a_b/messages/1", message("x")).unwrap();
        backend.flush();
        let cached = b.query_from_cache(&q).unwrap();
        assert_eq!(cached.docs.len(), 1);
        assert!(cached.from_cache);
    }

    #[test]
    fn failed_listener_gets_one_error_and_siblings_survive() {
        let (backend, _) = backend();
        let store = backend.client("a");
        let broken = Arc::new(Recorder::default());
        let healthy = Arc::new(Recorder::default());
        let _r1 = store
            .subscribe(Query::collection("users/a/friends"), broken.clone())
            .unwrap();
        let _r2 = store
            .subscribe(Query::collection("chats/a_b/messages"), healthy.clone())
            .unwrap();
        backend.flush();
        backend.fail_listeners("users/a/friends", StoreError::PermissionDenied("rules".into()));
        store.set("users/a/friends/b", DocumentWrite::new()).unwrap();
        store.set("chats/a_b/messages/1", message("x")).unwrap();
        backend.flush();
        assert_eq!(broken.errors.lock().len(), 1);
        assert_eq!(broken.snapshots.lock().len(), 1);
        assert_eq!(healthy.snapshots.lock().len(), 2);
    }
}
