use std::sync::Arc;

use parley_store_traits::{AuthUser, Clock, DocumentStore, DocumentWrite, Query};
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{Tag, User};
use crate::paths;
use crate::validation::{validate_tag_name, validate_username, MAX_TAGS};

pub const DEFAULT_AVATAR_URL: &str = "https://api.dicebear.com/7.x/identicon/svg?seed=parley";

/// Profile documents under `users/{uid}`.
pub struct ProfileStore {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn get_user(&self, user_id: &str) -> Result<User, SyncError> {
        let doc = self.store.get(&paths::user(user_id))?;
        User::from_snapshot(&doc).ok_or_else(|| SyncError::NotFound(format!("user {user_id}")))
    }

    fn owner_of(&self, handle: &str) -> Result<Option<String>, SyncError> {
        let found = self.store.query(
            &Query::collection(paths::USERS)
                .where_eq("displayName", handle)
                .limit(1),
        )?;
        Ok(found.docs.first().map(|d| d.id.clone()))
    }

    /// Whether no user holds `handle` (stored form, with `@`).
    pub fn is_username_available(&self, handle: &str) -> Result<bool, SyncError> {
        Ok(self.owner_of(handle)?.is_none())
    }

    /// Creates the profile on first sign-in; afterwards only refreshes the
    /// handle (when given) and the verification flag.
    pub fn ensure_user_document(
        &self,
        auth: &AuthUser,
        username: Option<&str>,
    ) -> Result<User, SyncError> {
        let handle = username.map(validate_username).transpose()?;
        if let Some(handle) = &handle {
            if self.owner_of(handle)?.is_some_and(|owner| owner != auth.id) {
                return Err(SyncError::AlreadyExists(format!("username {handle}")));
            }
        }
        let verified = auth.email_verified || auth.is_federated();
        let path = paths::user(&auth.id);
        let existing = self.store.get(&path)?;

        if !existing.exists() {
            let display_name = handle
                .or_else(|| auth.display_name.clone())
                .unwrap_or_default();
            let write = DocumentWrite::new()
                .set("uid", auth.id.as_str())
                .set("email", auth.email.clone().map_or(Value::Null, Value::from))
                .set("displayName", display_name)
                .set(
                    "photoURL",
                    auth.photo_url.clone().unwrap_or_else(|| DEFAULT_AVATAR_URL.to_string()),
                )
                .set("createdAt", self.clock.now().to_rfc3339())
                .set("emailVerified", verified)
                .set("provider", auth.provider.as_str())
                .set("tags", Value::Array(vec![]));
            self.store.set(&path, write)?;
            tracing::info!(user_id = %auth.id, provider = %auth.provider, "user document created");
            return self.get_user(&auth.id);
        }

        let mut write = DocumentWrite::new();
        if let Some(handle) = handle {
            write = write.set("displayName", handle);
        }
        if verified && existing.get_bool("emailVerified") != Some(true) {
            write = write.set("emailVerified", true);
        }
        if !write.is_empty() {
            self.store.update(&path, write)?;
            tracing::debug!(user_id = %auth.id, "user document refreshed");
        }
        self.get_user(&auth.id)
    }

    /// Returns the stored handle.
    pub fn update_username(&self, user_id: &str, raw: &str) -> Result<String, SyncError> {
        let handle = validate_username(raw)?;
        if self
            .owner_of(&handle)?
            .is_some_and(|owner| owner != user_id)
        {
            return Err(SyncError::AlreadyExists(format!("username {handle}")));
        }
        self.store.update(
            &paths::user(user_id),
            DocumentWrite::new().set("displayName", handle.as_str()),
        )?;
        Ok(handle)
    }

    pub fn set_email_verified(&self, user_id: &str, verified: bool) -> Result<(), SyncError> {
        self.store.update(
            &paths::user(user_id),
            DocumentWrite::new().set("emailVerified", verified),
        )?;
        Ok(())
    }

    pub fn add_tag(&self, user_id: &str, name: &str, color: &str) -> Result<Tag, SyncError> {
        let name = validate_tag_name(name)?;
        let mut user = self.get_user(user_id)?;
        if user.tags.len() >= MAX_TAGS {
            return Err(SyncError::Validation(format!("at most {MAX_TAGS} tags")));
        }
        let tag = Tag {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            color: color.to_string(),
        };
        user.tags.push(tag.clone());
        self.write_tags(user_id, &user.tags)?;
        Ok(tag)
    }

    /// Removing an unknown tag is a no-op.
    pub fn remove_tag(&self, user_id: &str, tag_id: &str) -> Result<(), SyncError> {
        let mut user = self.get_user(user_id)?;
        let before = user.tags.len();
        user.tags.retain(|t| t.id != tag_id);
        if user.tags.len() == before {
            return Ok(());
        }
        self.write_tags(user_id, &user.tags)
    }

    fn write_tags(&self, user_id: &str, tags: &[Tag]) -> Result<(), SyncError> {
        let value = serde_json::to_value(tags).map_err(|e| SyncError::Failed(e.to_string()))?;
        self.store
            .update(&paths::user(user_id), DocumentWrite::new().set("tags", value))?;
        Ok(())
    }
}
