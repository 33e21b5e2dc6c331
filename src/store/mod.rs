pub mod memory;
pub mod pocketbase;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

/// The named collections this crate reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Flows,
    Nodes,
    Edges,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Flows => "flows",
            Collection::Nodes => "nodes",
            Collection::Edges => "edges",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored record: the store-assigned id plus its field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> bool {
        self.fields.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn i64_field(&self, name: &str) -> i64 {
        self.fields.get(name).and_then(Value::as_i64).unwrap_or(0)
    }
}

/// Errors from store adapters.
///
/// Adapters map their internal failures into these variants. `NotFound` must
/// be distinguishable from every other failure so the loader can report a
/// missing flow separately from a broken connection.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("decode: {0}")]
    Decode(String),
}

/// Filter expression over record fields.
///
/// Renders to PocketBase filter syntax and is evaluated structurally by
/// [`memory::MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every record.
    All,
    Eq(String, Value),
    /// Substring match on text fields, membership match on multi-relations.
    Contains(String, String),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains(field.into(), needle.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut parts), Filter::And(more)) => {
                parts.extend(more);
                Filter::And(parts)
            }
            (Filter::And(mut parts), f) => {
                parts.push(f);
                Filter::And(parts)
            }
            (f, Filter::And(mut parts)) => {
                parts.insert(0, f);
                Filter::And(parts)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// PocketBase filter expression, or an empty string for [`Filter::All`].
    pub fn to_expression(&self) -> String {
        match self {
            Filter::All => String::new(),
            Filter::Eq(field, value) => format!("{field} = {}", literal(value)),
            Filter::Contains(field, needle) => format!("{field} ~ {}", quote(needle)),
            Filter::And(parts) => parts
                .iter()
                .filter(|p| **p != Filter::All)
                .map(|p| match p {
                    Filter::And(_) => format!("({})", p.to_expression()),
                    _ => p.to_expression(),
                })
                .collect::<Vec<_>>()
                .join(" && "),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => {
                if field == "id" {
                    return value.as_str() == Some(record.id.as_str());
                }
                match record.fields.get(field) {
                    // single-element relation arrays compare like a scalar
                    Some(Value::Array(items)) if items.len() == 1 => &items[0] == value,
                    Some(v) => v == value,
                    None => value.is_null(),
                }
            }
            Filter::Contains(field, needle) => match record.fields.get(field) {
                Some(Value::String(s)) => s.contains(needle.as_str()),
                Some(Value::Array(items)) => items.iter().any(|item| {
                    item.as_str().is_some_and(|s| s.contains(needle.as_str()))
                }),
                _ => false,
            },
            Filter::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Create/read/update/delete/list primitives over named collections.
///
/// There is no multi-record transaction; each call stands alone.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, collection: Collection, fields: Fields) -> Result<Record, StoreError>;
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<Record, StoreError>;
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;
    async fn get_one(&self, collection: Collection, id: &str) -> Result<Record, StoreError>;
    async fn get_full_list(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
    ) -> Result<Vec<Record>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: Value) -> Record {
        Record {
            id: "r1".into(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_flow_filter_expression() {
        let f = Filter::eq("flow", "abc123");
        assert_eq!(f.to_expression(), "flow = \"abc123\"");
    }

    #[test]
    fn test_combined_filter_expression() {
        let f = Filter::contains("creator", "u1")
            .and(Filter::eq("isSystemFlow", false))
            .and(Filter::eq("isShared", true));
        assert_eq!(
            f.to_expression(),
            "creator ~ \"u1\" && isSystemFlow = false && isShared = true"
        );
    }

    #[test]
    fn test_filter_escapes_quotes() {
        let f = Filter::eq("flow", "a\"b\\c");
        assert_eq!(f.to_expression(), r#"flow = "a\"b\\c""#);
    }

    #[test]
    fn test_all_is_empty_and_absorbed() {
        assert_eq!(Filter::All.to_expression(), "");
        assert_eq!(
            Filter::All.and(Filter::eq("isSystemFlow", true)),
            Filter::eq("isSystemFlow", true)
        );
    }

    #[test]
    fn test_eq_matches_scalar_and_single_relation() {
        assert!(Filter::eq("flow", "f1").matches(&record(json!({"flow": "f1"}))));
        assert!(Filter::eq("flow", "f1").matches(&record(json!({"flow": ["f1"]}))));
        assert!(!Filter::eq("flow", "f1").matches(&record(json!({"flow": "f2"}))));
        assert!(Filter::eq("id", "r1").matches(&record(json!({}))));
    }

    #[test]
    fn test_contains_matches_text_and_relation_list() {
        let f = Filter::contains("creator", "u1");
        assert!(f.matches(&record(json!({"creator": "u1"}))));
        assert!(f.matches(&record(json!({"creator": ["u9", "u1"]}))));
        assert!(!f.matches(&record(json!({"creator": ["u9"]}))));
        assert!(!f.matches(&record(json!({}))));
    }

    #[test]
    fn test_record_accessors_default_missing_fields() {
        let r = record(json!({"title": "T", "isShared": true, "order": 3}));
        assert_eq!(r.str_field("title"), Some("T"));
        assert!(r.bool_field("isShared"));
        assert!(!r.bool_field("isSystemFlow"));
        assert_eq!(r.i64_field("order"), 3);
        assert_eq!(r.i64_field("inputCount"), 0);
    }

    #[test]
    fn test_record_flattens_fields() {
        let r: Record = serde_json::from_value(json!({
            "id": "x1",
            "collectionName": "flows",
            "title": "Recon"
        }))
        .unwrap();
        assert_eq!(r.id, "x1");
        assert_eq!(r.str_field("title"), Some("Recon"));
    }
}
