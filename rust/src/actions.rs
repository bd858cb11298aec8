use crate::model::{MessageId, ReactionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    // Auth
    SignIn {
        /// Chosen handle; only used when the profile is created or renamed.
        username: Option<String>,
    },
    SignOut,

    // Conversation
    SelectFriend {
        friend_id: String,
    },
    CloseConversation,
    UpdateDraft {
        text: String,
    },
    SendMessage {
        text: String,
        reply_to: Option<MessageId>,
    },
    LoadOlderMessages,
    React {
        message_id: MessageId,
        kind: ReactionKind,
    },
    RemoveReaction {
        message_id: MessageId,
    },

    // Friends
    SendFriendRequest {
        username: String,
    },
    AcceptFriendRequest {
        friend_id: String,
    },
    RejectFriendRequest {
        friend_id: String,
    },
    CancelFriendRequest {
        friend_id: String,
    },
    RemoveFriend {
        friend_id: String,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (never includes message text or drafts).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::SignIn { .. } => "SignIn",
            AppAction::SignOut => "SignOut",

            // Conversation
            AppAction::SelectFriend { .. } => "SelectFriend",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::UpdateDraft { .. } => "UpdateDraft",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::LoadOlderMessages => "LoadOlderMessages",
            AppAction::React { .. } => "React",
            AppAction::RemoveReaction { .. } => "RemoveReaction",

            // Friends
            AppAction::SendFriendRequest { .. } => "SendFriendRequest",
            AppAction::AcceptFriendRequest { .. } => "AcceptFriendRequest",
            AppAction::RejectFriendRequest { .. } => "RejectFriendRequest",
            AppAction::CancelFriendRequest { .. } => "CancelFriendRequest",
            AppAction::RemoveFriend { .. } => "RemoveFriend",

            // UI
            AppAction::ClearToast => "ClearToast",
        }
    }
}
