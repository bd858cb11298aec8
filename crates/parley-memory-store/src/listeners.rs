//! Live query bookkeeping and the pending notification queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parley_store_traits::{
    ChangeKind, DocumentChange, Fields, Query, QueryListener, QuerySnapshot, StoreError,
};

use crate::ClientState;

pub(crate) struct ListenerEntry {
    pub(crate) client: Arc<ClientState>,
    pub(crate) query: Query,
    pub(crate) listener: Arc<dyn QueryListener>,
    pub(crate) alive: Arc<AtomicBool>,
    /// Result set of the last queued delivery.
    pub(crate) last: Option<Vec<(String, Fields)>>,
}

pub(crate) enum Payload {
    Snapshot(QuerySnapshot),
    Error(StoreError),
}

pub(crate) struct Notification {
    pub(crate) listener_id: u64,
    pub(crate) alive: Arc<AtomicBool>,
    pub(crate) listener: Arc<dyn QueryListener>,
    pub(crate) payload: Payload,
}

impl Notification {
    /// Delivers unless the registration was removed after queueing.
    pub(crate) fn deliver(self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        match self.payload {
            Payload::Snapshot(snapshot) => self.listener.on_snapshot(snapshot),
            Payload::Error(err) => self.listener.on_error(err),
        }
        true
    }
}

#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) entries: HashMap<u64, ListenerEntry>,
    pub(crate) queue: VecDeque<Notification>,
}

impl Listeners {
    pub(crate) fn remove(&mut self, id: u64) {
        if let Some(entry) = self.entries.remove(&id) {
            entry.alive.store(false, Ordering::SeqCst);
        }
        self.queue.retain(|n| n.listener_id != id);
    }
}

/// Changes between two result sets, in the order of the new one (removals last).
pub(crate) fn diff(
    previous: Option<&[(String, Fields)]>,
    current: &[(String, Fields)],
) -> Vec<DocumentChange> {
    let previous: HashMap<&str, &Fields> = previous
        .unwrap_or_default()
        .iter()
        .map(|(id, f)| (id.as_str(), f))
        .collect();
    let mut changes = Vec::new();
    for (id, fields) in current {
        match previous.get(id.as_str()) {
            None => changes.push(DocumentChange {
                kind: ChangeKind::Added,
                id: id.clone(),
            }),
            Some(old) if *old != fields => changes.push(DocumentChange {
                kind: ChangeKind::Modified,
                id: id.clone(),
            }),
            Some(_) => {}
        }
    }
    let still_present: std::collections::HashSet<&str> =
        current.iter().map(|(id, _)| id.as_str()).collect();
    let mut removed: Vec<&str> = previous
        .keys()
        .copied()
        .filter(|id| !still_present.contains(id))
        .collect();
    removed.sort_unstable();
    changes.extend(removed.into_iter().map(|id| DocumentChange {
        kind: ChangeKind::Removed,
        id: id.to_string(),
    }));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, v: i64) -> (String, Fields) {
        let mut f = Fields::new();
        f.insert("v".into(), json!(v));
        (id.to_string(), f)
    }

    #[test]
    fn first_delivery_is_all_added() {
        let changes = diff(None, &[row("a", 1), row("b", 2)]);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Added));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn detects_modified_and_removed() {
        let before = vec![row("a", 1), row("b", 2)];
        let after = vec![row("a", 5), row("c", 3)];
        let changes = diff(Some(&before), &after);
        assert_eq!(
            changes,
            vec![
                DocumentChange {
                    kind: ChangeKind::Modified,
                    id: "a".into()
                },
                DocumentChange {
                    kind: ChangeKind::Added,
                    id: "c".into()
                },
                DocumentChange {
                    kind: ChangeKind::Removed,
                    id: "b".into()
                },
            ]
        );
    }
}
