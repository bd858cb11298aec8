// Session lifecycle: profile bootstrap, friend sync and teardown.

use super::*;

use crate::event_bus::{BusEvent, FriendsListUpdate, Topic};
use crate::friend_sync::FriendEvent;
use crate::state::AuthState;

impl AppCore {
    /// Starts a session for the authenticator's current user.
    ///
    /// Signing in as the user who is already signed in does nothing beyond
    /// restarting a failed friends-list listener.
    pub fn sign_in(&mut self, username: Option<&str>) -> Result<(), SyncError> {
        let user = self.auth.current_user().ok_or(SyncError::NotSignedIn)?;
        if self.session.as_ref().is_some_and(|s| s.user_id == user.id) && username.is_none() {
            if self.friend_sync.is_faulted() {
                tracing::info!(user_id = %user.id, "restarting friend sync");
                self.open_friend_sync(&user.id)?;
            }
            return Ok(());
        }
        self.stop_session();

        let profile = self.profiles.ensure_user_document(&user, username)?;
        tracing::info!(user_id = %user.id, "start_session");

        let token = self.session_token;
        self.open_friend_sync(&user.id)?;

        let tx = self.core_sender.clone();
        let bus = self.bus.subscribe(Topic::FriendsListUpdate, move |event| {
            let BusEvent::FriendsListUpdate(FriendsListUpdate::Removed { user_ids }) = event else {
                return;
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::FriendsRemoved {
                token,
                user_ids: user_ids.clone(),
            })));
        });

        self.session = Some(Session {
            user_id: user.id.clone(),
            conversation: None,
            _bus: bus,
        });
        self.state.auth = AuthState::SignedIn {
            user_id: user.id,
            display_name: profile.display_name,
        };
        self.emit_auth();

        if let Err(e) = self.refresh_requests() {
            tracing::warn!(%e, "initial request refresh failed");
        }
        Ok(())
    }

    fn open_friend_sync(&mut self, user_id: &str) -> Result<(), SyncError> {
        let token = self.session_token;
        let tx = self.core_sender.clone();
        self.friend_sync.open(user_id, move |event| {
            let internal = match event {
                FriendEvent::Updated(friends) => InternalEvent::FriendsUpdated { token, friends },
                FriendEvent::Failed(error) => InternalEvent::ListenerFailed { token, error },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(internal)));
        })
    }

    pub fn sign_out(&mut self) {
        self.stop_session();
        if let Err(e) = self.auth.sign_out() {
            tracing::debug!(%e, "authenticator sign-out");
        }
        self.state.auth = AuthState::SignedOut;
        self.emit_auth();
    }

    /// Releases every subscription of the session and resets session state.
    pub(super) fn stop_session(&mut self) {
        self.session_token = self.session_token.wrapping_add(1);
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::info!(user_id = %session.user_id, "stop_session");

        self.presence.clear_all();
        self.presence.close_all();
        self.conversations.close_all();
        self.friend_sync.close();
        self.projection.clear();
        self.send_cooldown_until = None;

        self.state.friends.clear();
        self.state.pending_requests.clear();
        self.state.outgoing_requests.clear();
        self.state.current_conversation = None;
        self.state.busy = BusyState::idle();
        self.emit_full_state();
    }
}
