use chrono::{DateTime, Utc};

use crate::model::{MessageId, ReactionKind, ReplyRef, Tag};

/// The single snapshot a UI renders from.
///
/// Every mutation bumps `rev`; consumers can drop any update whose `rev` is not
/// newer than the last one they applied.
#[derive(Clone, Debug, PartialEq)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub busy: BusyState,
    /// Accepted friends, most recent conversation first.
    pub friends: Vec<FriendSummary>,
    pub pending_requests: Vec<RequestSummary>,
    pub outgoing_requests: Vec<RequestSummary>,
    pub current_conversation: Option<ConversationView>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::SignedOut,
            busy: BusyState::idle(),
            friends: vec![],
            pending_requests: vec![],
            outgoing_requests: vec![],
            current_conversation: None,
            toast: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn {
        user_id: String,
        display_name: String,
    },
}

impl AuthState {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthState::SignedOut => None,
            AuthState::SignedIn { user_id, .. } => Some(user_id),
        }
    }
}

/// "In flight" flags the UI should reflect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub sending: bool,
    pub loading_older: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            sending: false,
            loading_older: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastMessage {
    pub id: MessageId,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FriendSummary {
    pub user_id: String,
    pub display_name: String,
    pub photo_url: String,
    pub tags: Vec<Tag>,
    pub last_message: Option<LastMessage>,
    pub has_unread: bool,
}

impl FriendSummary {
    /// Sort key; friends without messages sort as if they last spoke at the epoch.
    pub fn activity(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSummary {
    pub user_id: String,
    pub display_name: String,
    pub photo_url: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionSummary {
    pub kind: ReactionKind,
    pub count: u32,
    pub reacted_by_me: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_mine: bool,
    pub read: bool,
    pub reply_to: Option<ReplyRef>,
    pub reactions: Vec<ReactionSummary>,
    pub my_reaction: Option<ReactionKind>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationView {
    pub chat_id: String,
    pub peer_id: String,
    /// Chronological.
    pub messages: Vec<ChatMessage>,
    pub can_load_older: bool,
    pub peer_typing: bool,
}
