//! Store layout.
//!
//! ```text
//! users/{uid}                            profile
//! users/{uid}/friends/{other}            edge owned by uid
//! chats/{chatId}                         optional conversation document
//! chats/{chatId}/messages/{messageId}    message
//! chats/{chatId}/typing/{uid}            typing heartbeat
//! ```

pub const USERS: &str = "users";

pub fn user(uid: &str) -> String {
    format!("{USERS}/{uid}")
}

pub fn friends(owner: &str) -> String {
    format!("{USERS}/{owner}/friends")
}

pub fn friend_edge(owner: &str, other: &str) -> String {
    format!("{USERS}/{owner}/friends/{other}")
}

pub fn chat(chat_id: &str) -> String {
    format!("chats/{chat_id}")
}

pub fn messages(chat_id: &str) -> String {
    format!("chats/{chat_id}/messages")
}

pub fn message(chat_id: &str, message_id: impl std::fmt::Display) -> String {
    format!("chats/{chat_id}/messages/{message_id}")
}

pub fn typing(chat_id: &str) -> String {
    format!("chats/{chat_id}/typing")
}

pub fn typing_mark(chat_id: &str, uid: &str) -> String {
    format!("chats/{chat_id}/typing/{uid}")
}
