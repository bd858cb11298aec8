use std::sync::Arc;

use parking_lot::Mutex;
use parley_memory_store::MemoryBackend;
use parley_store_traits::{
    AuthError, AuthUser, Authenticator, Fields, QueryListener, QuerySnapshot, StoreError,
};
use serde_json::{json, Value};

/// An authenticator whose signed-in user is set by the test.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    user: Mutex<Option<AuthUser>>,
}

impl StaticAuthenticator {
    pub fn signed_in(id: &str) -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(Some(auth_user(id))),
        })
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_user(&self, user: Option<AuthUser>) {
        *self.user.lock() = user;
    }
}

impl Authenticator for StaticAuthenticator {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().clone()
    }

    fn sign_out(&self) -> Result<(), AuthError> {
        self.user.lock().take().map(|_| ()).ok_or(AuthError::SignedOut)
    }
}

/// A password-provider user with an unverified `{id}@example.com` address.
pub fn auth_user(id: &str) -> AuthUser {
    AuthUser {
        id: id.to_string(),
        display_name: None,
        email: Some(format!("{id}@example.com")),
        email_verified: false,
        photo_url: None,
        provider: "password".to_string(),
    }
}

fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Writes `users/{id}` with the given handle (stored with its `@` prefix).
pub fn seed_user(backend: &MemoryBackend, id: &str, handle: &str) {
    let handle = if handle.starts_with('@') {
        handle.to_string()
    } else {
        format!("@{handle}")
    };
    backend
        .put(
            &format!("users/{id}"),
            object(json!({
                "uid": id,
                "displayName": handle,
                "email": format!("{id}@example.com"),
                "photoURL": "",
                "createdAt": "2024-01-01T00:00:00Z",
                "emailVerified": true,
                "provider": "password",
            })),
        )
        .expect("seed user");
}

/// Writes one directed edge `users/{owner}/friends/{other}`.
pub fn seed_edge(backend: &MemoryBackend, owner: &str, other: &str, status: &str) {
    backend
        .put(
            &format!("users/{owner}/friends/{other}"),
            object(json!({ "status": status, "addedAt": backend.now_millis() })),
        )
        .expect("seed edge");
}

/// Both `added` edges of an accepted friendship.
pub fn seed_friendship(backend: &MemoryBackend, a: &str, b: &str) {
    seed_edge(backend, a, b, "added");
    seed_edge(backend, b, a, "added");
}

/// A pending request from `from`, stored on the recipient's side.
pub fn seed_request(backend: &MemoryBackend, from: &str, to: &str) {
    seed_edge(backend, to, from, "pending");
}

/// Writes a message document directly on the server.
pub fn seed_message(
    backend: &MemoryBackend,
    chat_id: &str,
    id: u64,
    sender: &str,
    text: &str,
    timestamp: i64,
    read: bool,
) {
    backend
        .put(
            &format!("chats/{chat_id}/messages/{id}"),
            object(json!({
                "senderId": sender,
                "text": text,
                "timestamp": timestamp,
                "read": read,
                "replyTo": null,
            })),
        )
        .expect("seed message");
}

/// Collects values handed to a callback.
#[derive(Debug)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// A boxed callback feeding this recorder.
    pub fn callback(&self) -> Box<dyn Fn(T) + Send + Sync>
    where
        T: Send + 'static,
    {
        let rec = self.clone();
        Box::new(move |item| rec.push(item))
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn last(&self) -> Option<T> {
        self.items.lock().last().cloned()
    }

    pub fn all(&self) -> Vec<T> {
        self.items.lock().clone()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

/// A [`QueryListener`] that records what it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingListener {
    pub snapshots: Recorder<QuerySnapshot>,
    pub errors: Recorder<StoreError>,
}

impl QueryListener for RecordingListener {
    fn on_snapshot(&self, snapshot: QuerySnapshot) {
        self.snapshots.push(snapshot);
    }

    fn on_error(&self, error: StoreError) {
        self.errors.push(error);
    }
}
