use super::*;

use crate::friends::FriendRequest;
use crate::model::User;
use crate::state::RequestSummary;

fn request_summary(req: FriendRequest) -> RequestSummary {
    RequestSummary {
        user_id: req.user.uid,
        display_name: req.user.display_name,
        photo_url: req.user.photo_url,
        added_at: req.added_at,
    }
}

impl AppCore {
    /// Looks the handle up, then leaves a pending request on their side.
    pub fn send_friend_request(&mut self, username: &str) -> Result<(), SyncError> {
        let me = self.require_user()?;
        let found = self.graph.search_user(&me, username)?;
        if found.is_added {
            return Err(SyncError::AlreadyExists(format!(
                "already friends with {}",
                found.user.display_name
            )));
        }
        self.graph.send_friend_request(&me, &found.user.uid)?;
        self.refresh_requests()
    }

    pub fn accept_friend_request(&mut self, friend_id: &str) -> Result<Vec<User>, SyncError> {
        let me = self.require_user()?;
        let users = self.graph.accept_friend_request(&me, friend_id)?;
        self.refresh_requests()?;
        Ok(users)
    }

    pub fn reject_friend_request(&mut self, friend_id: &str) -> Result<(), SyncError> {
        let me = self.require_user()?;
        self.graph.reject_friend_request(&me, friend_id)?;
        self.refresh_requests()
    }

    pub fn cancel_friend_request(&mut self, friend_id: &str) -> Result<(), SyncError> {
        let me = self.require_user()?;
        self.graph.cancel_friend_request(&me, friend_id)?;
        self.refresh_requests()
    }

    /// Deletes the friendship and the whole conversation with `friend_id`.
    pub fn remove_friend(&mut self, friend_id: &str) -> Result<(), SyncError> {
        let me = self.require_user()?;
        let selected = self
            .open_chat_friend()
            .is_some_and(|f| f == friend_id);
        if selected {
            self.close_conversation();
        }
        self.graph.remove_friend(&me, friend_id)
    }

    fn open_chat_friend(&self) -> Option<&str> {
        self.session
            .as_ref()?
            .conversation
            .as_ref()
            .map(|c| c.friend_id.as_str())
    }

    /// Re-reads incoming and outgoing requests into state.
    pub fn refresh_requests(&mut self) -> Result<(), SyncError> {
        let me = self.require_user()?;
        let pending: Vec<_> = self
            .graph
            .pending_requests(&me)?
            .into_iter()
            .map(request_summary)
            .collect();
        let outgoing: Vec<_> = self
            .graph
            .outgoing_requests(&me)?
            .into_iter()
            .map(request_summary)
            .collect();
        if pending != self.state.pending_requests || outgoing != self.state.outgoing_requests {
            self.state.pending_requests = pending;
            self.state.outgoing_requests = outgoing;
            self.emit_requests();
        }
        Ok(())
    }
}
