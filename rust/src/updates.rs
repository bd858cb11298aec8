use crate::actions::AppAction;
use crate::conversation::ConversationSnapshot;
use crate::error::SyncError;
use crate::model::MessageId;
use crate::state::{AppState, AuthState, BusyState, ConversationView, FriendSummary, RequestSummary};

#[derive(Clone, Debug, PartialEq)]
pub enum AppUpdate {
    FullState(AppState),
    AuthChanged {
        rev: u64,
        auth: AuthState,
    },
    BusyChanged {
        rev: u64,
        busy: BusyState,
    },
    FriendsChanged {
        rev: u64,
        friends: Vec<FriendSummary>,
    },
    RequestsChanged {
        rev: u64,
        pending: Vec<RequestSummary>,
        outgoing: Vec<RequestSummary>,
    },
    CurrentConversationChanged {
        rev: u64,
        current_conversation: Option<ConversationView>,
    },
    ToastChanged {
        rev: u64,
        toast: Option<String>,
    },
    MessageSent {
        rev: u64,
        chat_id: String,
        message_id: MessageId,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::AuthChanged { rev, .. } => *rev,
            AppUpdate::BusyChanged { rev, .. } => *rev,
            AppUpdate::FriendsChanged { rev, .. } => *rev,
            AppUpdate::RequestsChanged { rev, .. } => *rev,
            AppUpdate::CurrentConversationChanged { rev, .. } => *rev,
            AppUpdate::ToastChanged { rev, .. } => *rev,
            AppUpdate::MessageSent { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results posted back to the core by component callbacks.
///
/// Every event carries the session token it was produced under; the core
/// drops events from a session that has since ended.
#[derive(Debug)]
pub enum InternalEvent {
    FriendsUpdated {
        token: u64,
        friends: Vec<FriendSummary>,
    },
    ConversationUpdated {
        token: u64,
        snapshot: ConversationSnapshot,
    },
    PeerTyping {
        token: u64,
        chat_id: String,
        typing: bool,
    },
    /// A sibling view removed a friendship.
    FriendsRemoved {
        token: u64,
        user_ids: Vec<String>,
    },
    ListenerFailed {
        token: u64,
        error: SyncError,
    },
    Toast(String),
}
