//! Live, enriched friend list of the signed-in user.
//!
//! One live query watches the user's accepted edges. Each friend gets a
//! profile and last-message summary, read cache-first, and one secondary
//! live query on that conversation's newest message so incoming messages
//! re-sort the list without re-running the edge query.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parley_store_traits::{
    Clock, Direction, DocumentSnapshot, DocumentStore, ListenerRegistration, Query, QuerySnapshot,
    StoreError,
};

use crate::chat_id::conversation_id;
use crate::coalesce::{Debouncer, FreshnessCache};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::event_bus::{BusEvent, BusSubscription, EventBus, FriendsListUpdate, Topic};
use crate::listener::ChannelListener;
use crate::model::{EdgeStatus, Message, User};
use crate::paths;
use crate::registry::ListenerRegistry;
use crate::state::{FriendSummary, LastMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendEvent {
    Updated(Vec<FriendSummary>),
    Failed(SyncError),
}

pub type FriendCallback = Box<dyn FnMut(FriendEvent) + Send>;

enum SignalKind {
    Edges(Result<QuerySnapshot, StoreError>),
    Latest {
        friend_id: String,
        result: Result<QuerySnapshot, StoreError>,
    },
    Bus(FriendsListUpdate),
}

struct Signal {
    generation: u64,
    kind: SignalKind,
}

struct Session {
    user_id: String,
    generation: u64,
    callback: FriendCallback,
    _edges: ListenerRegistration,
    _bus: BusSubscription,
    edges_received: bool,
    /// The edge listener died; the next `open` subscribes again.
    faulted: bool,
    friends: BTreeMap<String, FriendSummary>,
    latest: ListenerRegistry<String, ListenerRegistration>,
}

impl Session {
    fn sorted(&self) -> Vec<FriendSummary> {
        let mut list: Vec<FriendSummary> = self.friends.values().cloned().collect();
        list.sort_by(|a, b| {
            b.activity()
                .cmp(&a.activity())
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        list
    }
}

pub fn latest_message_query(chat_id: &str) -> Query {
    Query::collection(paths::messages(chat_id))
        .order_by("timestamp", Direction::Descending)
        .limit(1)
}

fn last_message(doc: &DocumentSnapshot) -> Option<LastMessage> {
    let m = Message::from_snapshot(doc)?;
    Some(LastMessage {
        id: m.id,
        sender_id: m.sender_id,
        text: m.text,
        timestamp: m.timestamp,
        read: m.read,
    })
}

fn has_unread(last: Option<&LastMessage>, me: &str) -> bool {
    last.is_some_and(|m| m.sender_id != me && !m.read)
}

pub struct FriendGraphSync {
    store: Arc<dyn DocumentStore>,
    bus: EventBus,
    page_limit: usize,
    session: Option<Session>,
    debouncer: Debouncer<Vec<String>>,
    freshness: FreshnessCache<String>,
    next_generation: u64,
    tx: flume::Sender<Signal>,
    rx: flume::Receiver<Signal>,
}

impl FriendGraphSync {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        bus: EventBus,
        config: &SyncConfig,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            store,
            bus,
            page_limit: config.friend_page_limit,
            session: None,
            debouncer: Debouncer::new(clock.clone(), config.friend_debounce_ms),
            freshness: FreshnessCache::new(clock, config.freshness_ttl_ms),
            next_generation: 0,
            tx,
            rx,
        }
    }

    /// Starts following `user_id`'s friends. Opening the same user again only
    /// swaps the callback and forces the next update to re-resolve everyone,
    /// unless the edge listener has failed, in which case it resubscribes.
    pub fn open(
        &mut self,
        user_id: &str,
        callback: impl FnMut(FriendEvent) + Send + 'static,
    ) -> Result<(), SyncError> {
        if let Some(session) = self.session.as_mut() {
            if session.user_id == user_id && !session.faulted {
                session.callback = Box::new(callback);
                self.freshness.clear();
                return Ok(());
            }
        }
        self.close();

        self.next_generation += 1;
        let generation = self.next_generation;
        let edges_query = Query::collection(paths::friends(user_id))
            .where_eq("status", EdgeStatus::Added.as_str())
            .limit(self.page_limit);
        let listener = ChannelListener::new(self.tx.clone(), move |result| Signal {
            generation,
            kind: SignalKind::Edges(result),
        });
        let edges = self.store.subscribe(edges_query, Arc::new(listener))?;

        let tx = self.tx.clone();
        let bus = self.bus.subscribe(Topic::FriendsListUpdate, move |event| {
            let BusEvent::FriendsListUpdate(update) = event;
            if matches!(update, FriendsListUpdate::Snapshot { .. }) {
                return;
            }
            let _ = tx.send(Signal {
                generation,
                kind: SignalKind::Bus(update.clone()),
            });
        });

        tracing::info!(user_id, "friend sync opened");
        self.session = Some(Session {
            user_id: user_id.to_string(),
            generation,
            callback: Box::new(callback),
            _edges: edges,
            _bus: bus,
            edges_received: false,
            faulted: false,
            friends: BTreeMap::new(),
            latest: ListenerRegistry::new(),
        });
        Ok(())
    }

    /// Stops every listener of the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(user_id = %session.user_id, friends = session.friends.len(), "friend sync closed");
        }
        self.debouncer.cancel();
        self.freshness.clear();
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the edge listener failed since the last `open`.
    pub fn is_faulted(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.faulted)
    }

    /// The current list, most recent conversation first.
    pub fn friends(&self) -> Vec<FriendSummary> {
        self.session.as_ref().map(Session::sorted).unwrap_or_default()
    }

    /// Number of per-friend latest-message listeners.
    pub fn latest_listener_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.latest.len())
    }

    /// Makes the next edge update re-read every friend.
    pub fn reset_freshness(&mut self) {
        self.freshness.clear();
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.debouncer.deadline()
    }

    /// Applies queued notifications and a due debounced edge update.
    /// Returns the number of callbacks invoked.
    pub fn pump(&mut self) -> usize {
        let mut emitted = 0;
        while let Ok(signal) = self.rx.try_recv() {
            let Some(session) = self.session.as_mut() else {
                continue;
            };
            if session.generation != signal.generation {
                continue;
            }
            match signal.kind {
                SignalKind::Edges(Ok(snapshot)) => {
                    let ids: Vec<String> = snapshot.docs.iter().map(|d| d.id.clone()).collect();
                    if session.edges_received {
                        self.debouncer.call(ids);
                    } else {
                        session.edges_received = true;
                        emitted += self.apply_edges(ids);
                    }
                }
                SignalKind::Edges(Err(e)) => {
                    tracing::warn!(user_id = %session.user_id, %e, "friend edge listener failed");
                    session.faulted = true;
                    self.debouncer.cancel();
                    (session.callback)(FriendEvent::Failed(SyncError::listener(e)));
                    emitted += 1;
                }
                SignalKind::Latest { friend_id, result } => {
                    emitted += self.apply_latest(&friend_id, result);
                }
                SignalKind::Bus(update) => {
                    emitted += self.apply_bus(update);
                }
            }
        }
        if let Some(ids) = self.debouncer.poll() {
            emitted += self.apply_edges(ids);
        }
        emitted
    }

    fn emit(&mut self) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        let list = session.sorted();
        (session.callback)(FriendEvent::Updated(list.clone()));
        let owner_id = session.user_id.clone();
        self.bus
            .publish(BusEvent::FriendsListUpdate(FriendsListUpdate::Snapshot {
                owner_id,
                friends: list,
            }));
        1
    }

    fn apply_edges(&mut self, ids: Vec<String>) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        let me = session.user_id.clone();
        let wanted: BTreeSet<&String> = ids.iter().collect();
        let gone: Vec<String> = session
            .friends
            .keys()
            .filter(|id| !wanted.contains(id))
            .cloned()
            .collect();
        for id in &gone {
            session.friends.remove(id);
            session.latest.remove(id);
            self.freshness.reset(id.as_str());
        }

        for friend_id in ids.iter().filter(|id| **id != me) {
            let due = self.freshness.check(friend_id.clone());
            let present = session.friends.contains_key(friend_id);
            if present && !due {
                continue;
            }
            match resolve_friend(self.store.as_ref(), &me, friend_id) {
                Ok(summary) => {
                    session.friends.insert(friend_id.clone(), summary);
                }
                Err(e) => {
                    // Keep whatever we had; a new friend appears on the next good read.
                    tracing::warn!(%friend_id, %e, stale = present, "friend enrichment failed");
                    self.freshness.reset(friend_id.as_str());
                    if !present {
                        continue;
                    }
                }
            }
            if !session.latest.contains(friend_id) {
                let generation = session.generation;
                let id = friend_id.clone();
                let listener = ChannelListener::new(self.tx.clone(), move |result| Signal {
                    generation,
                    kind: SignalKind::Latest {
                        friend_id: id.clone(),
                        result,
                    },
                });
                let query = latest_message_query(&conversation_id(&me, friend_id));
                let store = self.store.clone();
                if let Err(e) = session
                    .latest
                    .acquire(friend_id, || store.subscribe(query, Arc::new(listener)))
                {
                    tracing::warn!(%friend_id, %e, "latest message listener failed to start");
                }
            }
        }
        tracing::debug!(friends = session.friends.len(), removed = gone.len(), "friend edges applied");
        self.emit()
    }

    fn apply_latest(&mut self, friend_id: &str, result: Result<QuerySnapshot, StoreError>) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        let snapshot = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(friend_id, %e, "latest message listener failed");
                session.latest.remove(&friend_id.to_string());
                (session.callback)(FriendEvent::Failed(SyncError::listener(e)));
                return 1;
            }
        };
        let me = session.user_id.clone();
        let Some(friend) = session.friends.get_mut(friend_id) else {
            return 0;
        };
        let last = snapshot.docs.first().and_then(last_message);
        let unread = has_unread(last.as_ref(), &me);
        if friend.last_message == last && friend.has_unread == unread {
            return 0;
        }
        friend.last_message = last;
        friend.has_unread = unread;
        self.emit()
    }

    fn apply_bus(&mut self, update: FriendsListUpdate) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        let me = session.user_id.clone();
        let mut changed = false;
        match update {
            FriendsListUpdate::Removed { user_ids } => {
                for id in user_ids.iter().filter(|id| **id != me) {
                    if session.friends.remove(id).is_some() {
                        session.latest.remove(id);
                        changed = true;
                    }
                }
            }
            FriendsListUpdate::Added { users } => {
                for user in users.into_iter().filter(|u| u.uid != me) {
                    if session.friends.contains_key(&user.uid) {
                        continue;
                    }
                    self.freshness.reset(user.uid.as_str());
                    session
                        .friends
                        .insert(user.uid.clone(), provisional_summary(user));
                    changed = true;
                }
            }
            FriendsListUpdate::Snapshot { .. } => {}
        }
        if changed {
            self.emit()
        } else {
            0
        }
    }
}

fn provisional_summary(user: User) -> FriendSummary {
    FriendSummary {
        user_id: user.uid,
        display_name: user.display_name,
        photo_url: user.photo_url,
        tags: user.tags,
        last_message: None,
        has_unread: false,
    }
}

/// Reads a document from the local cache, falling back to the network.
pub(crate) fn get_cache_first(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<DocumentSnapshot, StoreError> {
    match store.get_from_cache(path) {
        Ok(doc) if doc.exists() => Ok(doc),
        _ => store.get(path),
    }
}

/// Runs a query against the local cache, falling back to the network.
pub(crate) fn query_cache_first(
    store: &dyn DocumentStore,
    query: &Query,
) -> Result<QuerySnapshot, StoreError> {
    match store.query_from_cache(query) {
        Ok(snapshot) if !snapshot.is_empty() => Ok(snapshot),
        _ => store.query(query),
    }
}

fn resolve_friend(
    store: &dyn DocumentStore,
    me: &str,
    friend_id: &str,
) -> Result<FriendSummary, SyncError> {
    let profile = get_cache_first(store, &paths::user(friend_id))?;
    let user = User::from_snapshot(&profile)
        .ok_or_else(|| SyncError::NotFound(format!("user {friend_id}")))?;
    let latest = query_cache_first(store, &latest_message_query(&conversation_id(me, friend_id)))?;
    let last = latest.docs.first().and_then(last_message);
    let has_unread = has_unread(last.as_ref(), me);
    Ok(FriendSummary {
        last_message: last,
        has_unread,
        ..provisional_summary(user)
    })
}
