//! Document store traits for the parley sync core
//!
//! The sync core never talks to a concrete backend. It reads, writes and
//! listens through [`DocumentStore`], a hierarchical document store in the
//! shape of the usual hosted realtime databases:
//!
//! - documents live at slash-separated paths inside collections
//! - queries support equality filters, one ordering, a limit and an exclusive cursor
//! - each client keeps a local cache that can answer reads without the network
//! - live queries push a fresh [`QuerySnapshot`] whenever their result set changes
//!
//! Listener callbacks may run on any thread; implementations must not call them
//! while holding locks the listener could need.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

pub mod auth;
pub mod clock;
pub mod document;
pub mod error;
pub mod query;
pub mod write;

pub use self::auth::{AuthError, AuthUser, Authenticator};
pub use self::clock::{millis_to_datetime, Clock, ManualClock, SystemClock};
pub use self::document::{DocumentSnapshot, DocumentWrite, FieldWrite, Fields};
pub use self::error::StoreError;
pub use self::query::{
    ChangeKind, Cursor, Direction, DocumentChange, Filter, Query, QuerySnapshot,
};
pub use self::write::WriteOp;

/// Receives the results of a live query.
pub trait QueryListener: Send + Sync {
    /// Called with the full result set every time it changes, and once on registration.
    fn on_snapshot(&self, snapshot: QuerySnapshot);

    /// Called when the live query fails. No further snapshots follow.
    fn on_error(&self, error: StoreError);
}

/// Handle to an active live query.
///
/// Dropping the registration removes the listener. Removal is idempotent and,
/// once it returns, no further callbacks are delivered to the listener.
pub struct ListenerRegistration {
    remover: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(remover: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remover: Some(Box::new(remover)),
        }
    }

    /// A registration that owns nothing.
    pub fn inert() -> Self {
        Self { remover: None }
    }

    pub fn remove(&mut self) {
        if let Some(remover) = self.remover.take() {
            remover();
        }
    }

    pub fn is_active(&self) -> bool {
        self.remover.is_some()
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A hierarchical document store with a client-side cache and live queries.
pub trait DocumentStore: Send + Sync {
    /// Name of the backend, for logs.
    fn backend(&self) -> &'static str;

    /// Reads a document from the server, refreshing the local cache.
    fn get(&self, path: &str) -> Result<DocumentSnapshot, StoreError>;

    /// Reads a document from the local cache only.
    ///
    /// Returns [`StoreError::CacheMiss`] if the cache has never seen the document.
    fn get_from_cache(&self, path: &str) -> Result<DocumentSnapshot, StoreError>;

    /// Runs a query on the server, refreshing the local cache.
    fn query(&self, query: &Query) -> Result<QuerySnapshot, StoreError>;

    /// Runs a query against the cached documents of the collection.
    ///
    /// Returns [`StoreError::CacheMiss`] if the collection has never been fetched.
    fn query_from_cache(&self, query: &Query) -> Result<QuerySnapshot, StoreError>;

    /// Applies all operations atomically: either every one commits or none does.
    fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Starts a live query.
    fn subscribe(
        &self,
        query: Query,
        listener: Arc<dyn QueryListener>,
    ) -> Result<ListenerRegistration, StoreError>;

    fn set(&self, path: &str, data: DocumentWrite) -> Result<(), StoreError> {
        self.batch_write(vec![WriteOp::set(path, data)])
    }

    fn create(&self, path: &str, data: DocumentWrite) -> Result<(), StoreError> {
        self.batch_write(vec![WriteOp::create(path, data)])
    }

    fn merge(&self, path: &str, data: DocumentWrite) -> Result<(), StoreError> {
        self.batch_write(vec![WriteOp::merge(path, data)])
    }

    fn update(&self, path: &str, data: DocumentWrite) -> Result<(), StoreError> {
        self.batch_write(vec![WriteOp::update(path, data)])
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.batch_write(vec![WriteOp::delete(path)])
    }
}
