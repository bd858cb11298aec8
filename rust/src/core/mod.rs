mod chat;
mod friends;
mod session;

use std::sync::Arc;

use flume::{Receiver, Sender};
use parking_lot::RwLock;
use parley_store_traits::{Authenticator, Clock, DocumentStore};

use crate::actions::AppAction;
use crate::config::SyncConfig;
use crate::conversation::{ConversationHandle, ConversationSnapshot, ConversationSync};
use crate::error::SyncError;
use crate::event_bus::{BusSubscription, EventBus};
use crate::friend_sync::FriendGraphSync;
use crate::friends::FriendGraph;
use crate::presence::PresenceSync;
use crate::profile::ProfileStore;
use crate::rate_limit::RateLimiters;
use crate::reactions::{ReactionEngine, ReactionProjection};
use crate::state::{AppState, BusyState};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

struct OpenChat {
    friend_id: String,
    chat_id: String,
    handle: ConversationHandle,
    snapshot: Option<ConversationSnapshot>,
    peer_typing: bool,
}

struct Session {
    user_id: String,
    conversation: Option<OpenChat>,
    _bus: BusSubscription,
}

/// The single-threaded app actor.
///
/// Actions and component callbacks both arrive as [`CoreMsg`]s. Component
/// callbacks only post to the core channel; `tick()` drives the components
/// and drains that channel.
pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    core_receiver: Receiver<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: SyncConfig,
    clock: Arc<dyn Clock>,
    auth: Arc<dyn Authenticator>,
    bus: EventBus,

    profiles: ProfileStore,
    graph: FriendGraph,
    friend_sync: FriendGraphSync,
    conversations: ConversationSync,
    presence: PresenceSync,
    reactions: ReactionEngine,
    projection: ReactionProjection,

    session: Option<Session>,
    // Bumped whenever a session ends; events from older sessions are dropped.
    session_token: u64,
    send_cooldown_until: Option<i64>,
}

impl AppCore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn Authenticator>,
        config: SyncConfig,
    ) -> (Self, Receiver<AppUpdate>) {
        let config = config.normalized();
        let (update_sender, update_receiver) = flume::unbounded();
        let (core_sender, core_receiver) = flume::unbounded();
        let bus = EventBus::new();
        let limiters = RateLimiters::from_config(clock.clone(), &config.rate_limits);

        let core = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            core_receiver,
            shared_state: Arc::new(RwLock::new(AppState::empty())),
            profiles: ProfileStore::new(store.clone(), clock.clone()),
            graph: FriendGraph::new(
                store.clone(),
                bus.clone(),
                limiters.friend_request.clone(),
                limiters.search.clone(),
            ),
            friend_sync: FriendGraphSync::new(store.clone(), clock.clone(), bus.clone(), &config),
            conversations: ConversationSync::new(
                store.clone(),
                clock.clone(),
                limiters.message.clone(),
                &config,
            ),
            presence: PresenceSync::new(store.clone(), clock.clone(), &config),
            reactions: ReactionEngine::new(store.clone()),
            projection: ReactionProjection::new(),
            config,
            clock,
            auth,
            bus,
            session: None,
            session_token: 0,
            send_cooldown_until: None,
        };
        tracing::info!(backend = store.backend(), "AppCore::new()");
        (core, update_receiver)
    }

    /// Latest committed state.
    pub fn state(&self) -> AppState {
        self.shared_state.read().clone()
    }

    pub fn shared_state(&self) -> Arc<RwLock<AppState>> {
        self.shared_state.clone()
    }

    /// Sender for hosts that feed actions from another thread.
    pub fn sender(&self) -> Sender<CoreMsg> {
        self.core_sender.clone()
    }

    pub(crate) fn receiver(&self) -> Receiver<CoreMsg> {
        self.core_receiver.clone()
    }

    pub fn dispatch(&mut self, action: AppAction) {
        self.handle_message(CoreMsg::Action(action));
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    /// Runs one turn of the event loop: component timers and notifications,
    /// then every queued message. Returns how many messages were handled.
    pub fn tick(&mut self) -> usize {
        self.friend_sync.pump();
        self.conversations.pump();
        self.presence.poll();

        let mut handled = 0;
        while let Ok(msg) = self.core_receiver.try_recv() {
            self.handle_message(msg);
            handled += 1;
        }

        let now = self.clock.now_millis();
        if self.send_cooldown_until.is_some_and(|until| until <= now) {
            self.send_cooldown_until = None;
            self.set_busy(|b| b.sending = false);
        }
        handled
    }

    /// When the next `tick()` has timer work to do, if ever.
    pub fn next_deadline(&self) -> Option<i64> {
        [
            self.friend_sync.next_deadline(),
            self.presence.next_deadline(),
            self.send_cooldown_until,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn emit(&mut self, update: AppUpdate) {
        self.commit_state();
        let _ = self.update_sender.send(update);
    }

    fn commit_state(&self) {
        *self.shared_state.write() = self.state.clone();
    }

    fn emit_full_state(&mut self) {
        self.next_rev();
        self.emit(AppUpdate::FullState(self.state.clone()));
    }

    fn emit_auth(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::AuthChanged {
            rev,
            auth: self.state.auth.clone(),
        });
    }

    fn emit_busy(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::BusyChanged {
            rev,
            busy: self.state.busy.clone(),
        });
    }

    fn emit_friends(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::FriendsChanged {
            rev,
            friends: self.state.friends.clone(),
        });
    }

    fn emit_requests(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::RequestsChanged {
            rev,
            pending: self.state.pending_requests.clone(),
            outgoing: self.state.outgoing_requests.clone(),
        });
    }

    fn emit_current_conversation(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::CurrentConversationChanged {
            rev,
            current_conversation: self.state.current_conversation.clone(),
        });
    }

    fn emit_toast(&mut self) {
        let rev = self.next_rev();
        self.emit(AppUpdate::ToastChanged {
            rev,
            toast: self.state.toast.clone(),
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Stays in state until ClearToast, so a resync still shows it.
        self.state.toast = Some(msg.into());
        self.emit_toast();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_busy();
        }
    }

    fn require_user(&self) -> Result<String, SyncError> {
        self.session
            .as_ref()
            .map(|s| s.user_id.clone())
            .ok_or(SyncError::NotSignedIn)
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::FriendsUpdated { token, friends } => {
                if token != self.session_token {
                    return;
                }
                self.state.friends = friends;
                self.emit_friends();
            }
            InternalEvent::ConversationUpdated { token, snapshot } => {
                if token != self.session_token {
                    return;
                }
                self.on_conversation_snapshot(snapshot);
            }
            InternalEvent::PeerTyping {
                token,
                chat_id,
                typing,
            } => {
                if token != self.session_token {
                    return;
                }
                self.on_peer_typing(&chat_id, typing);
            }
            InternalEvent::FriendsRemoved { token, user_ids } => {
                if token != self.session_token {
                    return;
                }
                let selected = self
                    .session
                    .as_ref()
                    .and_then(|s| s.conversation.as_ref())
                    .map(|c| c.friend_id.clone());
                if selected.is_some_and(|f| user_ids.contains(&f)) {
                    self.close_conversation();
                }
            }
            InternalEvent::ListenerFailed { token, error } => {
                if token != self.session_token {
                    return;
                }
                tracing::warn!(%error, "listener failed");
                self.toast(format!("Sync problem: {error}"));
            }
            InternalEvent::Toast(msg) => self.toast(msg),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        let tag = action.tag();
        let result = match action {
            AppAction::SignIn { username } => self.sign_in(username.as_deref()),
            AppAction::SignOut => {
                self.sign_out();
                Ok(())
            }
            AppAction::SelectFriend { friend_id } => self.select_friend(&friend_id),
            AppAction::CloseConversation => {
                self.close_conversation();
                Ok(())
            }
            AppAction::UpdateDraft { text } => self.update_draft(&text),
            AppAction::SendMessage { text, reply_to } => {
                self.send_message(&text, reply_to).map(|_| ())
            }
            AppAction::LoadOlderMessages => self.load_older().map(|_| ()),
            AppAction::React { message_id, kind } => self.react(message_id, kind).map(|_| ()),
            AppAction::RemoveReaction { message_id } => self.remove_reaction(message_id),
            AppAction::SendFriendRequest { username } => self.send_friend_request(&username),
            AppAction::AcceptFriendRequest { friend_id } => {
                self.accept_friend_request(&friend_id).map(|_| ())
            }
            AppAction::RejectFriendRequest { friend_id } => self.reject_friend_request(&friend_id),
            AppAction::CancelFriendRequest { friend_id } => self.cancel_friend_request(&friend_id),
            AppAction::RemoveFriend { friend_id } => self.remove_friend(&friend_id),
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_toast();
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::debug!(action = tag, %e, "action failed");
            self.toast(toast_for(tag, &e));
        }
    }
}

/// User-facing text for a failed action.
fn toast_for(tag: &str, err: &SyncError) -> String {
    match (tag, err) {
        ("SendMessage", SyncError::Offline(_)) => {
            "Message will be sent when connection is restored".to_string()
        }
        ("SendMessage", SyncError::RateLimited { retry_after_secs }) => {
            format!("Message rate limit exceeded. Please wait {retry_after_secs} seconds.")
        }
        ("SendMessage", SyncError::Validation(msg)) => msg.clone(),
        ("SendMessage", _) => "Message failed to send".to_string(),
        (_, SyncError::RateLimited { retry_after_secs }) => {
            format!("Too many attempts. Please wait {retry_after_secs} seconds.")
        }
        (_, SyncError::Offline(_)) => "You're offline".to_string(),
        (_, SyncError::NotSignedIn) => "Sign in first".to_string(),
        (_, e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_failures_distinguish_offline_from_failed() {
        assert_eq!(
            toast_for("SendMessage", &SyncError::Offline("x".into())),
            "Message will be sent when connection is restored"
        );
        assert_eq!(
            toast_for("SendMessage", &SyncError::PermissionDenied("x".into())),
            "Message failed to send"
        );
        assert_eq!(
            toast_for("SendMessage", &SyncError::RateLimited { retry_after_secs: 12 }),
            "Message rate limit exceeded. Please wait 12 seconds."
        );
    }
}
