//! Error types for document store operations

use thiserror::Error;

/// Error type for document store operations.
///
/// `Unavailable` is reserved for "the network is not reachable right now";
/// callers use it to tell a retrying write apart from a rejected one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Requested document was not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The store refused the operation for the current identity
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A create-only write found the document already present
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The network is not reachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The local cache cannot answer the read
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// A batch was rolled back
    #[error("aborted: {0}")]
    Aborted(String),

    /// Malformed path, query or write
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Other error
    #[error("error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether the failure is a connectivity problem the store will recover from.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotFound("users/a1".to_string());
        assert_eq!(err.to_string(), "not found: users/a1");

        let err = StoreError::Unavailable("offline".to_string());
        assert_eq!(err.to_string(), "unavailable: offline");

        let err = StoreError::CacheMiss("chats/a1_b1/messages".to_string());
        assert_eq!(err.to_string(), "cache miss: chats/a1_b1/messages");
    }

    #[test]
    fn test_only_unavailable_is_unavailable() {
        assert!(StoreError::Unavailable("x".into()).is_unavailable());
        assert!(!StoreError::PermissionDenied("x".into()).is_unavailable());
        assert!(!StoreError::Other("x".into()).is_unavailable());
    }

    #[test]
    fn test_store_error_is_error() {
        let err: Box<dyn std::error::Error> =
            Box::new(StoreError::Aborted("batch".to_string()));
        assert!(err.to_string().contains("aborted"));
    }
}
