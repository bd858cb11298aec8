//! Typing presence: self-expiring heartbeat marks per conversation and user.

use std::collections::HashMap;
use std::sync::Arc;

use parley_store_traits::{
    Clock, DocumentStore, DocumentWrite, ListenerRegistration, Query, QuerySnapshot, StoreError,
};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::listener::ChannelListener;
use crate::model::TypingMark;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    PeerTyping { chat_id: String, typing: bool },
    Failed { chat_id: String, error: SyncError },
}

pub type PresenceCallback = Box<dyn FnMut(PresenceEvent) + Send>;

struct LocalTyping {
    idle_deadline: i64,
    last_write: i64,
}

struct Watch {
    self_id: String,
    generation: u64,
    _registration: ListenerRegistration,
    marks: Option<Vec<TypingMark>>,
    reported: Option<bool>,
    callback: PresenceCallback,
}

struct Signal {
    chat_id: String,
    generation: u64,
    result: Result<QuerySnapshot, StoreError>,
}

pub struct PresenceSync {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    idle_ms: i64,
    stale_ms: i64,
    local: HashMap<(String, String), LocalTyping>,
    watches: HashMap<String, Watch>,
    next_generation: u64,
    tx: flume::Sender<Signal>,
    rx: flume::Receiver<Signal>,
}

impl PresenceSync {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            store,
            clock,
            idle_ms: config.typing_idle_ms,
            stale_ms: config.typing_stale_ms,
            local: HashMap::new(),
            watches: HashMap::new(),
            next_generation: 0,
            tx,
            rx,
        }
    }

    /// Edge-triggered: only the first `true` and the `false` after it write.
    ///
    /// Repeated `true` calls push the local idle timer out, and re-merge the
    /// heartbeat only once a full idle window has passed since the last write
    /// so readers never see a live typist go stale.
    pub fn set_typing(&mut self, chat_id: &str, user_id: &str, typing: bool) -> Result<(), SyncError> {
        let now = self.clock.now_millis();
        let key = (chat_id.to_string(), user_id.to_string());
        if !typing {
            if self.local.remove(&key).is_none() {
                return Ok(());
            }
            tracing::debug!(chat_id, "typing cleared");
            return self
                .store
                .delete(&paths::typing_mark(chat_id, user_id))
                .map_err(SyncError::from);
        }

        if let Some(local) = self.local.get_mut(&key) {
            local.idle_deadline = now + self.idle_ms;
            if now - local.last_write < self.idle_ms {
                return Ok(());
            }
            local.last_write = now;
            tracing::trace!(chat_id, "typing heartbeat");
        } else {
            tracing::debug!(chat_id, "typing started");
        }
        let result = self.store.merge(
            &paths::typing_mark(chat_id, user_id),
            DocumentWrite::new().server_timestamp("timestamp"),
        );
        match result {
            Ok(()) => {
                self.local.entry(key).or_insert(LocalTyping {
                    idle_deadline: now + self.idle_ms,
                    last_write: now,
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Same as `set_typing(.., false)`.
    pub fn clear(&mut self, chat_id: &str, user_id: &str) -> Result<(), SyncError> {
        self.set_typing(chat_id, user_id, false)
    }

    /// Clears every mark this client holds. Failures are logged.
    pub fn clear_all(&mut self) {
        for ((chat_id, user_id), _) in self.local.drain() {
            if let Err(e) = self.store.delete(&paths::typing_mark(&chat_id, &user_id)) {
                tracing::warn!(%chat_id, %e, "failed to clear typing mark");
            }
        }
    }

    pub fn is_typing(&self, chat_id: &str, user_id: &str) -> bool {
        self.local
            .contains_key(&(chat_id.to_string(), user_id.to_string()))
    }

    /// Watches the typing marks of `chat_id` for anyone other than `self_id`.
    ///
    /// One watch per conversation; subscribing again replaces the callback and
    /// re-reports the current state.
    pub fn subscribe(
        &mut self,
        chat_id: &str,
        self_id: &str,
        callback: impl FnMut(PresenceEvent) + Send + 'static,
    ) -> Result<(), SyncError> {
        if let Some(watch) = self.watches.get_mut(chat_id) {
            watch.self_id = self_id.to_string();
            watch.callback = Box::new(callback);
            watch.reported = None;
            return Ok(());
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let chat = chat_id.to_string();
        let listener = ChannelListener::new(self.tx.clone(), move |result| Signal {
            chat_id: chat.clone(),
            generation,
            result,
        });
        let registration = self
            .store
            .subscribe(Query::collection(paths::typing(chat_id)), Arc::new(listener))?;
        self.watches.insert(
            chat_id.to_string(),
            Watch {
                self_id: self_id.to_string(),
                generation,
                _registration: registration,
                marks: None,
                reported: None,
                callback: Box::new(callback),
            },
        );
        Ok(())
    }

    pub fn unsubscribe(&mut self, chat_id: &str) -> bool {
        self.watches.remove(chat_id).is_some()
    }

    pub fn close_all(&mut self) {
        self.watches.clear();
    }

    pub fn is_watching(&self, chat_id: &str) -> bool {
        self.watches.contains_key(chat_id)
    }

    /// Expires idle local marks, applies queued snapshots and re-evaluates
    /// staleness against the clock. Returns the number of events reported.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now_millis();

        let expired: Vec<(String, String)> = self
            .local
            .iter()
            .filter(|(_, l)| l.idle_deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for (chat_id, user_id) in expired {
            tracing::debug!(%chat_id, "typing idle");
            if let Err(e) = self.clear(&chat_id, &user_id) {
                tracing::warn!(%chat_id, %e, "failed to expire typing mark");
            }
        }

        let mut reported = 0;
        while let Ok(signal) = self.rx.try_recv() {
            let Some(watch) = self.watches.get_mut(&signal.chat_id) else {
                continue;
            };
            if watch.generation != signal.generation {
                continue;
            }
            match signal.result {
                Ok(snapshot) => {
                    watch.marks = Some(
                        snapshot
                            .docs
                            .iter()
                            .map(|d| TypingMark::from_snapshot(&signal.chat_id, d))
                            .collect(),
                    );
                }
                Err(e) => {
                    tracing::warn!(chat_id = %signal.chat_id, %e, "typing listener failed");
                    if let Some(mut watch) = self.watches.remove(&signal.chat_id) {
                        (watch.callback)(PresenceEvent::Failed {
                            chat_id: signal.chat_id.clone(),
                            error: SyncError::listener(e),
                        });
                        reported += 1;
                    }
                }
            }
        }

        for (chat_id, watch) in self.watches.iter_mut() {
            let Some(marks) = &watch.marks else {
                continue;
            };
            let typing = marks
                .iter()
                .any(|m| m.user_id != watch.self_id && m.is_fresh(now, self.stale_ms));
            if watch.reported != Some(typing) {
                watch.reported = Some(typing);
                (watch.callback)(PresenceEvent::PeerTyping {
                    chat_id: chat_id.clone(),
                    typing,
                });
                reported += 1;
            }
        }
        reported
    }

    /// The next instant at which `poll` has time-based work to do.
    pub fn next_deadline(&self) -> Option<i64> {
        let now = self.clock.now_millis();
        let idle = self.local.values().map(|l| l.idle_deadline);
        let stale = self.watches.values().flat_map(|w| {
            w.marks.iter().flatten().filter_map(|m| {
                let expires = m.timestamp_ms? + self.stale_ms;
                (m.user_id != w.self_id && expires > now).then_some(expires)
            })
        });
        idle.chain(stale).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use parley_memory_store::MemoryBackend;
    use parley_store_traits::ManualClock;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        backend: MemoryBackend,
        a: PresenceSync,
        b: PresenceSync,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let backend = MemoryBackend::new(clock.clone());
        let config = SyncConfig::default();
        let a = PresenceSync::new(Arc::new(backend.client("a")), clock.clone(), &config);
        let b = PresenceSync::new(Arc::new(backend.client("b")), clock.clone(), &config);
        Fixture {
            clock,
            backend,
            a,
            b,
        }
    }

    #[test]
    fn repeated_true_writes_once() {
        let mut f = fixture();
        f.a.set_typing("a_b", "a", true).unwrap();
        let first = f.backend.document("chats/a_b/typing/a").unwrap();
        f.clock.advance(Duration::from_millis(1_000));
        f.a.set_typing("a_b", "a", true).unwrap();
        assert_eq!(f.backend.document("chats/a_b/typing/a").unwrap(), first);
        f.a.set_typing("a_b", "a", false).unwrap();
        assert!(f.backend.document("chats/a_b/typing/a").is_none());
        // Clearing twice is a no-op.
        f.a.set_typing("a_b", "a", false).unwrap();
    }

    #[test]
    fn idle_timer_clears_mark() {
        let mut f = fixture();
        f.a.set_typing("a_b", "a", true).unwrap();
        f.clock.advance(Duration::from_millis(4_999));
        f.a.poll();
        assert!(f.a.is_typing("a_b", "a"));
        f.clock.advance(Duration::from_millis(1));
        f.a.poll();
        assert!(!f.a.is_typing("a_b", "a"));
        assert!(f.backend.document("chats/a_b/typing/a").is_none());
    }

    #[test]
    fn peer_sees_typing_until_mark_goes_stale() {
        let mut f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.b.subscribe("a_b", "b", move |e| sink.lock().push(e)).unwrap();
        f.backend.flush();
        f.b.poll();
        assert_eq!(
            seen.lock().last(),
            Some(&PresenceEvent::PeerTyping {
                chat_id: "a_b".into(),
                typing: false
            })
        );

        f.a.set_typing("a_b", "a", true).unwrap();
        f.backend.flush();
        f.b.poll();
        assert_eq!(
            seen.lock().last(),
            Some(&PresenceEvent::PeerTyping {
                chat_id: "a_b".into(),
                typing: true
            })
        );

        // The writer's mark stays in the store; the reader expires it by age.
        f.b.set_typing("a_b", "b", true).unwrap();
        f.clock.advance(Duration::from_millis(6_000));
        f.backend.flush();
        f.b.poll();
        assert_eq!(
            seen.lock().last(),
            Some(&PresenceEvent::PeerTyping {
                chat_id: "a_b".into(),
                typing: false
            })
        );
    }

    #[test]
    fn own_mark_is_not_peer_typing() {
        let mut f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.a.subscribe("a_b", "a", move |e| sink.lock().push(e)).unwrap();
        f.a.set_typing("a_b", "a", true).unwrap();
        f.backend.flush();
        f.a.poll();
        assert!(seen.lock().iter().all(|e| matches!(
            e,
            PresenceEvent::PeerTyping { typing: false, .. }
        )));
    }

    #[test]
    fn heartbeat_rewrites_after_idle_window() {
        let mut f = fixture();
        f.a.set_typing("a_b", "a", true).unwrap();
        let t0 = f.backend.document("chats/a_b/typing/a").unwrap();
        f.clock.advance(Duration::from_millis(4_000));
        f.a.set_typing("a_b", "a", true).unwrap();
        f.clock.advance(Duration::from_millis(1_000));
        f.a.set_typing("a_b", "a", true).unwrap();
        let t1 = f.backend.document("chats/a_b/typing/a").unwrap();
        assert_ne!(t0, t1);
    }
}
