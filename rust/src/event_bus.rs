//! In-process publish/subscribe for friend-list coherence between views.
//!
//! The bus is a hint that a sibling view should patch its local copy. The store
//! stays authoritative; nothing here is persisted.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::model::User;
use crate::state::FriendSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    FriendsListUpdate,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::FriendsListUpdate => "friendsListUpdate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendsListUpdate {
    /// The freshly resolved list of the publishing user.
    Snapshot {
        owner_id: String,
        friends: Vec<FriendSummary>,
    },
    /// A friendship was accepted; carries both profiles.
    Added { users: Vec<User> },
    /// A friendship was removed; carries both user ids.
    Removed { user_ids: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    FriendsListUpdate(FriendsListUpdate),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::FriendsListUpdate(_) => Topic::FriendsListUpdate,
        }
    }
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    handlers: BTreeMap<(Topic, u64), Handler>,
}

/// Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(&BusEvent) + Send + Sync + 'static,
    ) -> BusSubscription {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.handlers.insert((topic, id), Arc::new(handler));
        BusSubscription {
            bus: Arc::downgrade(&self.inner),
            key: Some((topic, id)),
        }
    }

    /// Delivers `event` synchronously to every subscriber of its topic.
    ///
    /// Handlers run without the bus lock held, so they may publish or
    /// unsubscribe themselves. A handler unsubscribed by an earlier handler in
    /// the same dispatch is skipped. Returns how many handlers ran.
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();
        let targets: Vec<(u64, Handler)> = {
            let inner = self.inner.lock();
            inner
                .handlers
                .range((topic, 0)..=(topic, u64::MAX))
                .map(|((_, id), h)| (*id, h.clone()))
                .collect()
        };
        let mut delivered = 0;
        for (id, handler) in targets {
            if !self.inner.lock().handlers.contains_key(&(topic, id)) {
                continue;
            }
            handler(&event);
            delivered += 1;
        }
        tracing::trace!(topic = topic.as_str(), delivered, "bus publish");
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .lock()
            .handlers
            .range((topic, 0)..=(topic, u64::MAX))
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.inner.lock().handlers.len())
            .finish()
    }
}

/// Unsubscribes on drop.
pub struct BusSubscription {
    bus: Weak<Mutex<Inner>>,
    key: Option<(Topic, u64)>,
}

impl BusSubscription {
    pub fn unsubscribe(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().handlers.remove(&key);
        }
    }

    pub fn is_active(&self) -> bool {
        self.key.is_some()
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed(ids: &[&str]) -> BusEvent {
        BusEvent::FriendsListUpdate(FriendsListUpdate::Removed {
            user_ids: ids.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn every_subscriber_receives() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = seen.clone();
        let _a = bus.subscribe(Topic::FriendsListUpdate, move |_| s1.lock().push(1));
        let s2 = seen.clone();
        let _b = bus.subscribe(Topic::FriendsListUpdate, move |_| s2.lock().push(2));
        assert_eq!(bus.publish(removed(&["a"])), 2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::FriendsListUpdate, |_| panic!("must not run"));
        drop(sub);
        assert_eq!(bus.publish(removed(&["a"])), 0);
        assert_eq!(bus.subscriber_count(Topic::FriendsListUpdate), 0);
    }

    #[test]
    fn handler_may_unsubscribe_itself_and_a_sibling() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Vec<BusSubscription>>> = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(Mutex::new(0));

        let slot_in = slot.clone();
        let first = bus.subscribe(Topic::FriendsListUpdate, move |_| {
            for mut sub in slot_in.lock().drain(..) {
                sub.unsubscribe();
            }
        });
        let h = hits.clone();
        let second = bus.subscribe(Topic::FriendsListUpdate, move |_| *h.lock() += 1);
        slot.lock().push(first);
        slot.lock().push(second);

        assert_eq!(bus.publish(removed(&["a"])), 1);
        assert_eq!(*hits.lock(), 0);
        assert_eq!(bus.publish(removed(&["a"])), 0);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Topic::FriendsListUpdate, |_| {});
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
