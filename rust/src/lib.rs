mod actions;
mod chat_id;
mod coalesce;
mod config;
mod conversation;
mod core;
mod error;
mod event_bus;
mod friend_sync;
mod friends;
mod listener;
mod logging;
mod model;
mod paths;
mod presence;
mod profile;
mod rate_limit;
mod reactions;
mod registry;
mod state;
mod updates;
mod validation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use parley_store_traits::{Authenticator, Clock, DocumentStore};

pub use crate::core::AppCore;
pub use actions::AppAction;
pub use chat_id::{conversation_id, peer_of};
pub use coalesce::{Debouncer, FreshnessCache};
pub use config::{
    default_config_json, load_config, RateLimitConfig, RateWindow, SyncConfig, CONFIG_FILE_NAME,
};
pub use conversation::{
    ConversationEvent, ConversationHandle, ConversationSnapshot, ConversationSync,
    MessageIdGenerator, OlderPage,
};
pub use error::SyncError;
pub use event_bus::{BusEvent, BusSubscription, EventBus, FriendsListUpdate, Topic};
pub use friend_sync::{FriendEvent, FriendGraphSync};
pub use friends::{FriendGraph, FriendRequest, SearchResult};
pub use logging::init_logging;
pub use model::{
    EdgeStatus, FriendEdge, Message, MessageId, ReactionKind, ReplyRef, SortKey, Tag, TypingMark,
    User,
};
pub use presence::{PresenceEvent, PresenceSync};
pub use profile::{ProfileStore, DEFAULT_AVATAR_URL};
pub use rate_limit::{admit, AdmissionControl, RateLimiters, SlidingWindowLimiter};
pub use reactions::{summarize, toggle_target, ReactionEngine, ReactionProjection};
pub use registry::ListenerRegistry;
pub use state::*;
pub use updates::*;
pub use validation::{validate_tag_name, validate_username};

/// Longest the actor sleeps before pumping store notifications again.
const IDLE_TICK: Duration = Duration::from_millis(50);

pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Thread-backed handle around [`AppCore`].
///
/// The core runs on its own thread; `dispatch` never blocks and updates are
/// delivered to a single reconciler.
pub struct SyncApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shutdown: Arc<AtomicBool>,
    shared_state: Arc<RwLock<AppState>>,
}

impl SyncApp {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn Authenticator>,
        config: SyncConfig,
    ) -> Arc<Self> {
        tracing::info!(backend = store.backend(), "SyncApp::new() starting");
        let (core, update_rx) = AppCore::new(store, clock.clone(), auth, config);
        let core_tx = core.sender();
        let shared_state = core.shared_state();
        let shutdown = Arc::new(AtomicBool::new(false));

        // Actor loop thread (single threaded "app actor").
        let shutdown_for_core = shutdown.clone();
        thread::spawn(move || run_actor(core, clock, shutdown_for_core));

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shutdown,
            shared_state,
        })
    }

    pub fn state(&self) -> AppState {
        self.shared_state.read().clone()
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl Drop for SyncApp {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_actor(mut core: AppCore, clock: Arc<dyn Clock>, shutdown: Arc<AtomicBool>) {
    let rx = core.receiver();
    while !shutdown.load(Ordering::SeqCst) {
        let wait = core
            .next_deadline()
            .map(|at| Duration::from_millis((at - clock.now_millis()).max(0) as u64))
            .map_or(IDLE_TICK, |d| d.min(IDLE_TICK));
        match rx.recv_timeout(wait) {
            Ok(msg) => core.handle_message(msg),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        core.tick();
    }
    tracing::info!("actor loop stopped");
}
