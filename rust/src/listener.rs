//! Glue between store live queries and the components' signal channels.
//!
//! Store callbacks never mutate component state directly: they tag the result
//! and push it onto a channel the component drains in `pump()`/`poll()`.

use parley_store_traits::{QueryListener, QuerySnapshot, StoreError};

pub(crate) struct ChannelListener<S> {
    tx: flume::Sender<S>,
    map: Box<dyn Fn(Result<QuerySnapshot, StoreError>) -> S + Send + Sync>,
}

impl<S: Send + 'static> ChannelListener<S> {
    pub(crate) fn new(
        tx: flume::Sender<S>,
        map: impl Fn(Result<QuerySnapshot, StoreError>) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            tx,
            map: Box::new(map),
        }
    }
}

impl<S: Send + 'static> QueryListener for ChannelListener<S> {
    fn on_snapshot(&self, snapshot: QuerySnapshot) {
        // The receiver only goes away when the component is dropped.
        let _ = self.tx.send((self.map)(Ok(snapshot)));
    }

    fn on_error(&self, error: StoreError) {
        let _ = self.tx.send((self.map)(Err(error)));
    }
}
