use parley_store_traits::StoreError;
use thiserror::Error;

/// Typed failure of a sync operation.
///
/// Every variant is recoverable: the user can re-invoke the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The network is unavailable; the store will retry once it comes back.
    #[error("offline: {0}")]
    Offline(String),

    /// A live subscription faulted. Sibling subscriptions keep running.
    #[error("listener error: {0}")]
    ListenerError(String),

    /// Rejected locally before touching the store.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("failed: {0}")]
    Failed(String),

    #[error("not signed in")]
    NotSignedIn,
}

impl SyncError {
    /// Wraps the error a live query reported.
    pub fn listener(err: StoreError) -> Self {
        Self::ListenerError(err.to_string())
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::Offline(msg),
            StoreError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::AlreadyExists(msg) => Self::AlreadyExists(msg),
            other => Self::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_sync_taxonomy() {
        assert_eq!(
            SyncError::from(StoreError::Unavailable("down".into())),
            SyncError::Offline("down".into())
        );
        assert_eq!(
            SyncError::from(StoreError::PermissionDenied("rules".into())),
            SyncError::PermissionDenied("rules".into())
        );
        assert!(matches!(
            SyncError::from(StoreError::Aborted("batch".into())),
            SyncError::Failed(_)
        ));
    }

    #[test]
    fn rate_limited_display_mentions_seconds() {
        let err = SyncError::RateLimited {
            retry_after_secs: 12,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 12s");
    }
}
