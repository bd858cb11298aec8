//! Friend requests, acceptance, removal and user search.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_store_traits::{DocumentStore, DocumentWrite, Query, WriteOp};

use crate::chat_id::conversation_id;
use crate::error::SyncError;
use crate::event_bus::{BusEvent, EventBus, FriendsListUpdate};
use crate::model::{EdgeStatus, FriendEdge, User};
use crate::paths;
use crate::rate_limit::{admit, AdmissionControl};
use crate::validation::validate_username;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequest {
    pub user: User,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub user: User,
    pub is_added: bool,
    pub is_pending: bool,
}

fn edge_write(status: EdgeStatus) -> DocumentWrite {
    DocumentWrite::new()
        .set("status", status.as_str())
        .server_timestamp("addedAt")
}

pub struct FriendGraph {
    store: Arc<dyn DocumentStore>,
    bus: EventBus,
    request_limiter: Arc<dyn AdmissionControl>,
    search_limiter: Arc<dyn AdmissionControl>,
}

impl FriendGraph {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        bus: EventBus,
        request_limiter: Arc<dyn AdmissionControl>,
        search_limiter: Arc<dyn AdmissionControl>,
    ) -> Self {
        Self {
            store,
            bus,
            request_limiter,
            search_limiter,
        }
    }

    fn edge(&self, owner: &str, other: &str) -> Result<Option<FriendEdge>, SyncError> {
        let doc = self.store.get(&paths::friend_edge(owner, other))?;
        Ok(doc
            .exists()
            .then(|| FriendEdge::from_snapshot(owner, &doc))
            .flatten())
    }

    fn profile(&self, user_id: &str) -> Result<User, SyncError> {
        let doc = self.store.get(&paths::user(user_id))?;
        User::from_snapshot(&doc).ok_or_else(|| SyncError::NotFound(format!("user {user_id}")))
    }

    /// The edge between `a` and `b`, looking at `a`'s side first.
    pub fn friend_status(&self, a: &str, b: &str) -> Result<Option<FriendEdge>, SyncError> {
        if let Some(edge) = self.edge(a, b)? {
            return Ok(Some(edge));
        }
        self.edge(b, a)
    }

    /// Leaves a pending edge on the recipient's side.
    pub fn send_friend_request(&self, from: &str, to: &str) -> Result<(), SyncError> {
        if from == to {
            return Err(SyncError::Validation("cannot send a friend request to yourself".into()));
        }
        admit(self.request_limiter.as_ref(), from)?;
        if self.friend_status(from, to)?.is_some() {
            return Err(SyncError::AlreadyExists(format!("friend request with {to}")));
        }
        self.profile(to)?;
        self.store
            .set(&paths::friend_edge(to, from), edge_write(EdgeStatus::Pending))?;
        tracing::info!(to, "friend request sent");
        Ok(())
    }

    /// Writes both `added` edges in one batch and returns both profiles.
    pub fn accept_friend_request(&self, user_id: &str, friend_id: &str) -> Result<Vec<User>, SyncError> {
        match self.edge(user_id, friend_id)? {
            None => {
                return Err(SyncError::NotFound(format!("friend request from {friend_id}")));
            }
            Some(edge) if edge.status == EdgeStatus::Added => {
                return Err(SyncError::AlreadyExists(format!("friendship with {friend_id}")));
            }
            Some(_) => {}
        }
        self.store.batch_write(vec![
            WriteOp::set(paths::friend_edge(user_id, friend_id), edge_write(EdgeStatus::Added)),
            WriteOp::set(paths::friend_edge(friend_id, user_id), edge_write(EdgeStatus::Added)),
        ])?;
        let users = vec![self.profile(user_id)?, self.profile(friend_id)?];
        tracing::info!(friend_id, "friend request accepted");
        self.bus
            .publish(BusEvent::FriendsListUpdate(FriendsListUpdate::Added {
                users: users.clone(),
            }));
        Ok(users)
    }

    /// Deletes the pending request `friend_id` sent to `user_id`.
    pub fn reject_friend_request(&self, user_id: &str, friend_id: &str) -> Result<(), SyncError> {
        self.delete_pending(user_id, friend_id)?;
        tracing::info!(friend_id, "friend request rejected");
        Ok(())
    }

    /// Withdraws the request `user_id` sent to `friend_id`.
    pub fn cancel_friend_request(&self, user_id: &str, friend_id: &str) -> Result<(), SyncError> {
        self.delete_pending(friend_id, user_id)?;
        tracing::info!(friend_id, "friend request cancelled");
        Ok(())
    }

    fn delete_pending(&self, owner: &str, other: &str) -> Result<(), SyncError> {
        match self.edge(owner, other)? {
            Some(edge) if edge.status == EdgeStatus::Pending => {
                self.store.delete(&paths::friend_edge(owner, other))?;
                Ok(())
            }
            _ => Err(SyncError::NotFound(format!("pending request {other} -> {owner}"))),
        }
    }

    /// Deletes the conversation and both edges in one batch.
    pub fn remove_friend(&self, user_id: &str, friend_id: &str) -> Result<(), SyncError> {
        let chat_id = conversation_id(user_id, friend_id);
        let messages = self
            .store
            .query(&Query::collection(paths::messages(&chat_id)))?;
        let typing = self.store.query(&Query::collection(paths::typing(&chat_id)))?;

        let mut ops: Vec<WriteOp> = messages
            .docs
            .iter()
            .chain(typing.docs.iter())
            .map(|d| WriteOp::delete(d.path.clone()))
            .collect();
        let deleted_messages = messages.len();
        ops.push(WriteOp::delete(paths::chat(&chat_id)));
        ops.push(WriteOp::delete(paths::friend_edge(user_id, friend_id)));
        ops.push(WriteOp::delete(paths::friend_edge(friend_id, user_id)));
        self.store.batch_write(ops)?;

        tracing::info!(friend_id, %chat_id, deleted_messages, "friend removed");
        self.bus
            .publish(BusEvent::FriendsListUpdate(FriendsListUpdate::Removed {
                user_ids: vec![user_id.to_string(), friend_id.to_string()],
            }));
        Ok(())
    }

    /// Requests waiting for `user_id` to answer.
    pub fn pending_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>, SyncError> {
        self.edges_with_profiles(user_id, EdgeStatus::Pending)
    }

    /// Accepted friends with their profiles, unsorted.
    pub fn friends_list(&self, user_id: &str) -> Result<Vec<User>, SyncError> {
        Ok(self
            .edges_with_profiles(user_id, EdgeStatus::Added)?
            .into_iter()
            .map(|r| r.user)
            .collect())
    }

    fn edges_with_profiles(
        &self,
        user_id: &str,
        status: EdgeStatus,
    ) -> Result<Vec<FriendRequest>, SyncError> {
        let edges = self.store.query(
            &Query::collection(paths::friends(user_id)).where_eq("status", status.as_str()),
        )?;
        let mut out = Vec::with_capacity(edges.len());
        for doc in &edges.docs {
            let Some(edge) = FriendEdge::from_snapshot(user_id, doc) else {
                continue;
            };
            match self.profile(&edge.other_id) {
                Ok(user) => out.push(FriendRequest {
                    user,
                    added_at: edge.added_at,
                }),
                Err(SyncError::NotFound(_)) => {
                    tracing::debug!(other_id = %edge.other_id, "edge to a missing profile");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Requests `user_id` sent that are still pending.
    ///
    /// Pending edges live on the recipient's side, so this scans every other
    /// user's edge to `user_id`.
    pub fn outgoing_requests(&self, user_id: &str) -> Result<Vec<FriendRequest>, SyncError> {
        let users = self.store.query(&Query::collection(paths::USERS))?;
        let mut out = Vec::new();
        for doc in &users.docs {
            if doc.id == user_id {
                continue;
            }
            let Some(edge) = self.edge(&doc.id, user_id)? else {
                continue;
            };
            if edge.status != EdgeStatus::Pending {
                continue;
            }
            if let Some(user) = User::from_snapshot(doc) {
                out.push(FriendRequest {
                    user,
                    added_at: edge.added_at,
                });
            }
        }
        Ok(out)
    }

    /// Finds a user by handle and reports how they relate to `searcher_id`.
    pub fn search_user(&self, searcher_id: &str, raw: &str) -> Result<SearchResult, SyncError> {
        let handle = validate_username(raw)?;
        admit(self.search_limiter.as_ref(), searcher_id)?;
        let found = self.store.query(
            &Query::collection(paths::USERS)
                .where_eq("displayName", handle.as_str())
                .limit(1),
        )?;
        let user = found
            .docs
            .first()
            .and_then(User::from_snapshot)
            .ok_or_else(|| SyncError::NotFound(format!("user {handle}")))?;
        if user.uid == searcher_id {
            return Err(SyncError::Validation("that's you".into()));
        }
        let status = self.friend_status(searcher_id, &user.uid)?.map(|e| e.status);
        Ok(SearchResult {
            is_added: status == Some(EdgeStatus::Added),
            is_pending: status == Some(EdgeStatus::Pending),
            user,
        })
    }
}
