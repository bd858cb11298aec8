//! Records as they are stored, and their parsed forms.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_store_traits::{millis_to_datetime, DocumentSnapshot, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// A profile document (`users/{uid}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    /// Unique handle, stored with its `@` prefix.
    pub display_name: String,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
    pub email_verified: bool,
    pub created_at: Option<String>,
    pub tags: Vec<Tag>,
    pub provider: Option<String>,
}

impl User {
    pub fn from_snapshot(doc: &DocumentSnapshot) -> Option<Self> {
        let data = doc.data.clone()?;
        let mut user: User = match serde_json::from_value(Value::Object(data)) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(path = %doc.path, %e, "unreadable profile");
                return None;
            }
        };
        if user.uid.is_empty() {
            user.uid = doc.id.clone();
        }
        Some(user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Pending,
    Added,
}

impl EdgeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeStatus::Pending => "pending",
            EdgeStatus::Added => "added",
        }
    }
}

/// A directed edge `users/{owner_id}/friends/{other_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEdge {
    pub owner_id: String,
    pub other_id: String,
    pub status: EdgeStatus,
    pub added_at: DateTime<Utc>,
}

impl FriendEdge {
    pub fn from_snapshot(owner_id: &str, doc: &DocumentSnapshot) -> Option<Self> {
        let status = match doc.get_str("status")? {
            "pending" => EdgeStatus::Pending,
            "added" => EdgeStatus::Added,
            other => {
                tracing::warn!(path = %doc.path, status = other, "unknown edge status");
                return None;
            }
        };
        Some(Self {
            owner_id: owner_id.to_string(),
            other_id: doc.id.clone(),
            status,
            added_at: millis_to_datetime(doc.get_i64("addedAt").unwrap_or(0)),
        })
    }
}

/// Send-time message id. Ids of one sender strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(MessageId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Love,
    Haha,
    Sad,
    Like,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 4] = [
        ReactionKind::Love,
        ReactionKind::Haha,
        ReactionKind::Sad,
        ReactionKind::Like,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Love => "love",
            ReactionKind::Haha => "haha",
            ReactionKind::Sad => "sad",
            ReactionKind::Like => "like",
        }
    }

    /// Case-insensitive; unknown kinds yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
    }
}

/// The quoted message a reply points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub id: String,
    pub sender_id: String,
    pub text: String,
}

/// Ordering of messages; ties on timestamp break by the document id string.
pub type SortKey = (DateTime<Utc>, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub reply_to: Option<ReplyRef>,
    /// user id -> reaction; at most one per user.
    pub reactions: BTreeMap<String, ReactionKind>,
}

impl Message {
    /// Parses a message document.
    ///
    /// A timestamp the server has not resolved yet falls back to the send-time id.
    pub fn from_snapshot(doc: &DocumentSnapshot) -> Option<Self> {
        let data = doc.data.as_ref()?;
        let id: MessageId = match doc.id.parse() {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(path = %doc.path, "message id is not a send time");
                return None;
            }
        };
        Some(Self {
            id,
            sender_id: doc.get_str("senderId").unwrap_or_default().to_string(),
            text: doc.get_str("text").unwrap_or_default().to_string(),
            timestamp: normalize_timestamp(data.get("timestamp"), id),
            read: doc.get_bool("read").unwrap_or(false),
            reply_to: data
                .get("replyTo")
                .filter(|v| !v.is_null())
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            reactions: parse_reactions(data),
        })
    }

    /// Render order: timestamp, then document id as the store compares it.
    pub fn sort_key(&self) -> SortKey {
        (self.timestamp, self.id.to_string())
    }

    pub fn reply_ref(&self) -> ReplyRef {
        ReplyRef {
            id: self.id.to_string(),
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
        }
    }
}

fn normalize_timestamp(value: Option<&Value>, id: MessageId) -> DateTime<Utc> {
    match value {
        Some(Value::Number(n)) => {
            if let Some(ms) = n.as_i64() {
                return millis_to_datetime(ms);
            }
        }
        Some(Value::String(s)) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return dt.with_timezone(&Utc);
            }
        }
        _ => {}
    }
    millis_to_datetime(i64::try_from(id.0).unwrap_or(i64::MAX))
}

fn parse_reactions(data: &Fields) -> BTreeMap<String, ReactionKind> {
    let Some(Value::Object(map)) = data.get("reactions") else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(user, kind)| Some((user.clone(), ReactionKind::parse(kind.as_str()?)?)))
        .collect()
}

/// A typing heartbeat (`chats/{chatId}/typing/{uid}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingMark {
    pub conversation_id: String,
    pub user_id: String,
    pub timestamp_ms: Option<i64>,
}

impl TypingMark {
    pub fn from_snapshot(conversation_id: &str, doc: &DocumentSnapshot) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            user_id: doc.id.clone(),
            timestamp_ms: doc.get_i64("timestamp"),
        }
    }

    /// A mark without a timestamp counts as infinitely old.
    pub fn is_fresh(&self, now_ms: i64, stale_ms: i64) -> bool {
        now_ms - self.timestamp_ms.unwrap_or(0) < stale_ms
    }
}
