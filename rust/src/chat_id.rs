//! Conversation identity.

/// The canonical id of the 1:1 conversation between `a` and `b`.
///
/// Both participants derive the same id regardless of who starts the chat.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// The other participant of `chat_id`, if `me` is one of them.
pub fn peer_of<'a>(chat_id: &'a str, me: &str) -> Option<&'a str> {
    if let Some(rest) = chat_id.strip_prefix(me).and_then(|r| r.strip_prefix('_')) {
        if conversation_id(me, rest) == chat_id {
            return Some(rest);
        }
    }
    let rest = chat_id.strip_suffix(me)?.strip_suffix('_')?;
    (conversation_id(me, rest) == chat_id).then_some(rest)
}
