//! Per-client local cache.

use std::num::NonZeroUsize;

use lru::LruCache;
use parley_store_traits::document::parent_collection;
use parley_store_traits::{DocumentSnapshot, Fields, Query, QuerySnapshot, StoreError};

use crate::snapshot_from_rows;

/// What one client has seen of the server.
///
/// Documents map to `None` when the client knows they do not exist. A
/// collection is only queryable from cache once a network query or live
/// query has covered it.
pub(crate) struct ClientCache {
    docs: LruCache<String, Option<Fields>>,
    collections: LruCache<String, ()>,
}

impl ClientCache {
    pub(crate) fn new(documents: NonZeroUsize, collections: NonZeroUsize) -> Self {
        Self {
            docs: LruCache::new(documents),
            collections: LruCache::new(collections),
        }
    }

    pub(crate) fn record(&mut self, path: &str, data: Option<Fields>) {
        self.docs.put(path.to_string(), data);
    }

    pub(crate) fn record_query(&mut self, collection: &str, rows: &[(String, Fields)]) {
        self.collections.put(collection.to_string(), ());
        for (id, fields) in rows {
            self.docs
                .put(format!("{collection}/{id}"), Some(fields.clone()));
        }
    }

    pub(crate) fn get(&mut self, path: &str) -> Result<DocumentSnapshot, StoreError> {
        match self.docs.get(path) {
            Some(data) => Ok(DocumentSnapshot::new(path, data.clone(), true)),
            None => Err(StoreError::CacheMiss(path.to_string())),
        }
    }

    pub(crate) fn query(&mut self, query: &Query) -> Result<QuerySnapshot, StoreError> {
        if self.collections.get(&query.collection).is_none() {
            return Err(StoreError::CacheMiss(query.collection.clone()));
        }
        let prefix = format!("{}/", query.collection);
        let candidates = self.docs.iter().filter_map(|(path, data)| {
            let fields = data.as_ref()?;
            let id = path.strip_prefix(&prefix)?;
            if parent_collection(path) != query.collection {
                return None;
            }
            Some((id, fields))
        });
        let rows = query.evaluate(candidates);
        Ok(snapshot_from_rows(&query.collection, rows, true))
    }

    pub(crate) fn document_count(&self) -> usize {
        self.docs.iter().filter(|(_, d)| d.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store_traits::Direction;
    use serde_json::json;

    fn cache() -> ClientCache {
        ClientCache::new(
            NonZeroUsize::new(8).unwrap(),
            NonZeroUsize::new(4).unwrap(),
        )
    }

    fn fields(ts: i64) -> Fields {
        let mut f = Fields::new();
        f.insert("timestamp".into(), json!(ts));
        f
    }

    #[test]
    fn unknown_collection_is_a_miss() {
        let mut c = cache();
        c.record("chats/a_b/messages/1", Some(fields(1)));
        let q = Query::collection("chats/a_b/messages");
        assert!(matches!(c.query(&q), Err(StoreError::CacheMiss(_))));
    }

    #[test]
    fn known_missing_document_is_a_hit() {
        let mut c = cache();
        c.record("users/a", None);
        let snap = c.get("users/a").unwrap();
        assert!(!snap.exists());
        assert!(snap.from_cache);
        assert!(c.get("users/b").is_err());
    }

    #[test]
    fn query_ignores_nested_collections() {
        let mut c = cache();
        c.record_query(
            "chats/a_b/messages",
            &[("1".into(), fields(1)), ("2".into(), fields(2))],
        );
        c.record("chats/a_b/messages/2/extra/x", Some(fields(9)));
        let q = Query::collection("chats/a_b/messages").order_by("timestamp", Direction::Descending);
        let snap = c.query(&q).unwrap();
        let ids: Vec<_> = snap.docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn lru_evicts_oldest_documents() {
        let mut c = ClientCache::new(
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(1).unwrap(),
        );
        c.record("users/a", Some(fields(1)));
        c.record("users/b", Some(fields(2)));
        c.record("users/c", Some(fields(3)));
        assert!(c.get("users/a").is_err());
        assert_eq!(c.document_count(), 2);
    }
}
