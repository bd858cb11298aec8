//! Per-message reactions, one per user, plus the optimistic local projection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parley_store_traits::{DocumentStore, DocumentWrite, StoreError};

use crate::error::SyncError;
use crate::model::{Message, MessageId, ReactionKind};
use crate::paths;
use crate::state::ReactionSummary;

/// The reaction `react(kind)` should leave, given the user's current one.
pub fn toggle_target(current: Option<ReactionKind>, kind: ReactionKind) -> Option<ReactionKind> {
    if current == Some(kind) {
        None
    } else {
        Some(kind)
    }
}

/// Writes reactions as single-field updates under `reactions.{uid}`, so
/// concurrent reactors on the same message never overwrite each other.
pub struct ReactionEngine {
    store: Arc<dyn DocumentStore>,
}

impl ReactionEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The user's reaction as last seen by this client.
    pub fn current(
        &self,
        chat_id: &str,
        message_id: MessageId,
        user_id: &str,
    ) -> Result<Option<ReactionKind>, SyncError> {
        let path = paths::message(chat_id, message_id);
        let doc = match self.store.get_from_cache(&path) {
            Ok(doc) if doc.exists() => doc,
            _ => self.store.get(&path)?,
        };
        let message = Message::from_snapshot(&doc)
            .ok_or_else(|| SyncError::NotFound(format!("message {message_id}")))?;
        Ok(message.reactions.get(user_id).copied())
    }

    /// Toggles `kind`: sets or replaces the user's reaction, or removes it if
    /// it already is `kind`. Returns the reaction now in place.
    pub fn react(
        &self,
        chat_id: &str,
        message_id: MessageId,
        user_id: &str,
        kind: ReactionKind,
    ) -> Result<Option<ReactionKind>, SyncError> {
        let current = self.current(chat_id, message_id, user_id)?;
        let target = toggle_target(current, kind);
        self.apply(chat_id, message_id, user_id, target)?;
        Ok(target)
    }

    pub fn remove(&self, chat_id: &str, message_id: MessageId, user_id: &str) -> Result<(), SyncError> {
        self.apply(chat_id, message_id, user_id, None)
    }

    /// Writes `target` as the user's reaction without reading first.
    pub fn apply(
        &self,
        chat_id: &str,
        message_id: MessageId,
        user_id: &str,
        target: Option<ReactionKind>,
    ) -> Result<(), SyncError> {
        let field = format!("reactions.{user_id}");
        let write = match target {
            Some(kind) => DocumentWrite::new().set(field, kind.as_str()),
            None => DocumentWrite::new().delete(field),
        };
        tracing::debug!(
            chat_id,
            %message_id,
            reaction = target.map(ReactionKind::as_str).unwrap_or("none"),
            "react"
        );
        match self.store.update(&paths::message(chat_id, message_id), write) {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(SyncError::NotFound(format!("message {message_id}"))),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    target: Option<ReactionKind>,
    acked: bool,
}

/// Local reactions shown before the store confirms them.
///
/// Entries are overlaid on authoritative snapshots until a snapshot arrives
/// after the write was acknowledged; from then on the store wins.
#[derive(Debug, Default)]
pub struct ReactionProjection {
    pending: HashMap<(MessageId, String), Pending>,
}

impl ReactionProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an optimistic change. A newer change for the same key replaces it.
    pub fn record(&mut self, message_id: MessageId, user_id: &str, target: Option<ReactionKind>) {
        self.pending.insert(
            (message_id, user_id.to_string()),
            Pending {
                target,
                acked: false,
            },
        );
    }

    /// The write for this key succeeded.
    pub fn ack(&mut self, message_id: MessageId, user_id: &str) {
        if let Some(p) = self.pending.get_mut(&(message_id, user_id.to_string())) {
            p.acked = true;
        }
    }

    /// The write failed; fall back to the store's view.
    pub fn fail(&mut self, message_id: MessageId, user_id: &str) {
        self.pending.remove(&(message_id, user_id.to_string()));
    }

    /// Called with each authoritative snapshot; drops acknowledged entries.
    pub fn reconcile(&mut self) {
        self.pending.retain(|_, p| !p.acked);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// `reactions` of `message_id` with the pending entries applied.
    pub fn overlay(
        &self,
        message_id: MessageId,
        reactions: &BTreeMap<String, ReactionKind>,
    ) -> BTreeMap<String, ReactionKind> {
        let mut out = reactions.clone();
        for ((id, user), p) in &self.pending {
            if *id != message_id {
                continue;
            }
            match p.target {
                Some(kind) => {
                    out.insert(user.clone(), kind);
                }
                None => {
                    out.remove(user);
                }
            }
        }
        out
    }

    pub fn target(&self, message_id: MessageId, user_id: &str) -> Option<Option<ReactionKind>> {
        self.pending
            .get(&(message_id, user_id.to_string()))
            .map(|p| p.target)
    }
}

/// Counts per kind, in display order.
pub fn summarize(reactions: &BTreeMap<String, ReactionKind>, me: &str) -> Vec<ReactionSummary> {
    ReactionKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let count = reactions.values().filter(|k| **k == kind).count();
            (count > 0).then(|| ReactionSummary {
                kind,
                count: u32::try_from(count).unwrap_or(u32::MAX),
                reacted_by_me: reactions.get(me) == Some(&kind),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_rules() {
        use ReactionKind::*;
        assert_eq!(toggle_target(None, Love), Some(Love));
        assert_eq!(toggle_target(Some(Love), Love), None);
        assert_eq!(toggle_target(Some(Haha), Love), Some(Love));
    }

    #[test]
    fn projection_overlays_until_acked_snapshot() {
        let id = MessageId(1);
        let mut store_view = BTreeMap::new();
        store_view.insert("b1".to_string(), ReactionKind::Sad);

        let mut p = ReactionProjection::new();
        p.record(id, "a1", Some(ReactionKind::Love));
        p.record(id, "b1", None);
        let shown = p.overlay(id, &store_view);
        assert_eq!(shown.get("a1"), Some(&ReactionKind::Love));
        assert!(!shown.contains_key("b1"));

        // A snapshot racing ahead of the write does not erase the projection.
        p.reconcile();
        assert_eq!(p.len(), 2);

        p.ack(id, "a1");
        p.fail(id, "b1");
        p.reconcile();
        assert!(p.is_empty());
        assert_eq!(p.overlay(id, &store_view), store_view);
    }

    #[test]
    fn summary_counts_and_marks_mine() {
        let mut r = BTreeMap::new();
        r.insert("a".to_string(), ReactionKind::Like);
        r.insert("b".to_string(), ReactionKind::Like);
        r.insert("c".to_string(), ReactionKind::Love);
        let s = summarize(&r, "b");
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].kind, ReactionKind::Love);
        assert!(!s[0].reacted_by_me);
        assert_eq!(s[1].count, 2);
        assert!(s[1].reacted_by_me);
    }
}
