//! Documents, paths and field-level writes.
//!
//! Paths are slash-separated and alternate collection / document segments:
//! `users/a1` is a document, `users/a1/friends` a collection, and
//! `users/a1/friends/b1` a document again. Field paths inside a document are
//! dotted (`reactions.a1`) and address nested maps.

use serde_json::Value;

use crate::StoreError;

/// The data of one document.
pub type Fields = serde_json::Map<String, Value>;

/// Splits a path into non-empty segments.
fn segments(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

/// Checks that `path` names a document (even number of non-empty segments).
pub fn validate_document_path(path: &str) -> Result<(), StoreError> {
    let parts = segments(path);
    if parts.iter().any(|s| s.is_empty()) || parts.len() % 2 != 0 {
        return Err(StoreError::InvalidArgument(format!(
            "not a document path: {path}"
        )));
    }
    Ok(())
}

/// Checks that `path` names a collection (odd number of non-empty segments).
pub fn validate_collection_path(path: &str) -> Result<(), StoreError> {
    let parts = segments(path);
    if parts.iter().any(|s| s.is_empty()) || parts.len() % 2 != 1 {
        return Err(StoreError::InvalidArgument(format!(
            "not a collection path: {path}"
        )));
    }
    Ok(())
}

/// The collection a document lives in (`users/a1/friends/b1` -> `users/a1/friends`).
pub fn parent_collection(doc_path: &str) -> &str {
    doc_path.rsplit_once('/').map(|(c, _)| c).unwrap_or("")
}

/// The last segment of a document path.
pub fn document_id(doc_path: &str) -> &str {
    doc_path.rsplit_once('/').map(|(_, id)| id).unwrap_or(doc_path)
}

/// Reads a dotted field path.
pub fn get_field<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = fields.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Writes a dotted field path, creating (or replacing non-object) intermediate maps.
pub fn set_field(fields: &mut Fields, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Fields::new()));
            if !entry.is_object() {
                *entry = Value::Object(Fields::new());
            }
            if let Value::Object(inner) = entry {
                set_field(inner, rest, value);
            }
        }
    }
}

/// Removes a dotted field path, returning the old value.
pub fn remove_field(fields: &mut Fields, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => fields.remove(path),
        Some((head, rest)) => match fields.get_mut(head) {
            Some(Value::Object(inner)) => remove_field(inner, rest),
            _ => None,
        },
    }
}

/// A point-in-time read of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: String,
    pub id: String,
    /// `None` when the document does not exist.
    pub data: Option<Fields>,
    /// Whether the read was served from the local cache.
    pub from_cache: bool,
}

impl DocumentSnapshot {
    pub fn new(path: impl Into<String>, data: Option<Fields>, from_cache: bool) -> Self {
        let path = path.into();
        let id = document_id(&path).to_string();
        Self {
            path,
            id,
            data,
            from_cache,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| get_field(d, field))
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }
}

/// One field-level write.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Value(Value),
    /// Resolved by the store to its own clock, in epoch milliseconds.
    ServerTimestamp,
    /// Removes the field.
    Delete,
}

/// An ordered list of field writes applied to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    fields: Vec<(String, FieldWrite)>,
}

impl DocumentWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every top-level entry of `fields` as a plain value write.
    pub fn from_fields(fields: Fields) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, FieldWrite::Value(v)))
                .collect(),
        }
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .push((path.into(), FieldWrite::Value(value.into())));
        self
    }

    pub fn server_timestamp(mut self, path: impl Into<String>) -> Self {
        self.fields.push((path.into(), FieldWrite::ServerTimestamp));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.fields.push((path.into(), FieldWrite::Delete));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldWrite)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Applies the writes onto `target`, resolving server timestamps to `now_ms`.
    pub fn apply_to(&self, target: &mut Fields, now_ms: i64) {
        for (path, write) in &self.fields {
            match write {
                FieldWrite::Value(v) => set_field(target, path, v.clone()),
                FieldWrite::ServerTimestamp => set_field(target, path, Value::from(now_ms)),
                FieldWrite::Delete => {
                    remove_field(target, path);
                }
            }
        }
    }
}
