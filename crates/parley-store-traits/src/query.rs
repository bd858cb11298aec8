//! Collection queries and their results.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{get_field, DocumentSnapshot, Fields};

/// Sort direction of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filter on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

/// Exclusive pagination boundary: the order value and id of the last fetched document.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub value: Value,
    pub id: String,
}

impl Cursor {
    /// Builds a cursor from a fetched document, or `None` if it lacks the order field.
    pub fn from_document(doc: &DocumentSnapshot, order_field: &str) -> Option<Self> {
        Some(Self {
            value: doc.get(order_field)?.clone(),
            id: doc.id.clone(),
        })
    }
}

/// A query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// Whether a document passes the filters (and carries the order field, if any).
    pub fn matches(&self, fields: &Fields) -> bool {
        let filtered = self
            .filters
            .iter()
            .all(|f| get_field(fields, &f.field) == Some(&f.value));
        let orderable = match &self.order_by {
            Some((field, _)) => get_field(fields, field).is_some(),
            None => true,
        };
        filtered && orderable
    }

    /// Runs the query over `(id, fields)` candidates that already belong to the collection.
    pub fn evaluate<'a, I>(&self, candidates: I) -> Vec<(String, Fields)>
    where
        I: IntoIterator<Item = (&'a str, &'a Fields)>,
    {
        let mut rows: Vec<(String, Fields)> = candidates
            .into_iter()
            .filter(|(_, fields)| self.matches(fields))
            .map(|(id, fields)| (id.to_string(), fields.clone()))
            .collect();

        let (field, direction) = match &self.order_by {
            Some((f, d)) => (Some(f.as_str()), *d),
            None => (None, Direction::Ascending),
        };
        let key = |id: &str, fields: &Fields| -> (Value, String) {
            let v = field
                .and_then(|f| get_field(fields, f).cloned())
                .unwrap_or(Value::Null);
            (v, id.to_string())
        };
        let cmp_keys = |a: &(Value, String), b: &(Value, String)| -> Ordering {
            compare_values(&a.0, &b.0).then_with(|| a.1.cmp(&b.1))
        };

        rows.sort_by(|a, b| {
            let ord = cmp_keys(&key(&a.0, &a.1), &key(&b.0, &b.1));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });

        if let Some(cursor) = &self.start_after {
            let boundary = (cursor.value.clone(), cursor.id.clone());
            rows.retain(|(id, fields)| {
                let ord = cmp_keys(&key(id, fields), &boundary);
                match direction {
                    Direction::Ascending => ord == Ordering::Greater,
                    Direction::Descending => ord == Ordering::Less,
                }
            });
        }

        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = x.as_f64().unwrap_or(0.0);
                    let y = y.as_f64().unwrap_or(0.0);
                    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// How a document changed between two deliveries of the same live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub id: String,
}

/// The result set of a query at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
    /// Changes relative to the previous delivery (every doc is `Added` on the first one).
    pub changes: Vec<DocumentChange>,
    pub from_cache: bool,
}

impl QuerySnapshot {
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(ts: i64, read: bool) -> Fields {
        let mut f = Fields::new();
        f.insert("timestamp".into(), json!(ts));
        f.insert("read".into(), json!(read));
        f
    }

    #[test]
    fn orders_descending_with_id_tiebreak_and_limit() {
        let docs = [
            ("1", doc(10, false)),
            ("3", doc(30, false)),
            ("2", doc(30, true)),
            ("4", doc(5, false)),
        ];
        let q = Query::collection("chats/a_b/messages")
            .order_by("timestamp", Direction::Descending)
            .limit(3);
        let ids: Vec<String> = q
            .evaluate(docs.iter().map(|(id, f)| (*id, f)))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[test]
    fn start_after_is_exclusive() {
        let docs = [("1", doc(10, false)), ("2", doc(20, false)), ("3", doc(30, false))];
        let q = Query::collection("c")
            .order_by("timestamp", Direction::Descending)
            .start_after(Cursor {
                value: json!(20),
                id: "2".into(),
            });
        let ids: Vec<String> = q
            .evaluate(docs.iter().map(|(id, f)| (*id, f)))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn filters_and_missing_order_field() {
        let mut no_ts = Fields::new();
        no_ts.insert("read".into(), json!(false));
        let docs = [("1", doc(10, true)), ("2", doc(20, false)), ("3", no_ts)];
        let q = Query::collection("c")
            .where_eq("read", false)
            .order_by("timestamp", Direction::Ascending);
        let ids: Vec<String> = q
            .evaluate(docs.iter().map(|(id, f)| (*id, f)))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn value_order_across_types() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }
}
