//! Write operations accepted by [`DocumentStore::batch_write`](crate::DocumentStore::batch_write).

use crate::document::DocumentWrite;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replaces the whole document, creating it if needed.
    Set { path: String, data: DocumentWrite },
    /// Writes a new document; fails with `AlreadyExists` when it is present.
    Create { path: String, data: DocumentWrite },
    /// Applies the field writes onto the document, creating it if needed.
    Merge { path: String, data: DocumentWrite },
    /// Applies the field writes onto an existing document; fails with `NotFound` otherwise.
    Update { path: String, data: DocumentWrite },
    /// Deletes the document. Deleting a missing document is not an error.
    Delete { path: String },
}

impl WriteOp {
    pub fn set(path: impl Into<String>, data: DocumentWrite) -> Self {
        Self::Set {
            path: path.into(),
            data,
        }
    }

    pub fn create(path: impl Into<String>, data: DocumentWrite) -> Self {
        Self::Create {
            path: path.into(),
            data,
        }
    }

    pub fn merge(path: impl Into<String>, data: DocumentWrite) -> Self {
        Self::Merge {
            path: path.into(),
            data,
        }
    }

    pub fn update(path: impl Into<String>, data: DocumentWrite) -> Self {
        Self::Update {
            path: path.into(),
            data,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Create { path, .. }
            | Self::Merge { path, .. }
            | Self::Update { path, .. }
            | Self::Delete { path } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Create { .. } => "create",
            Self::Merge { .. } => "merge",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}
