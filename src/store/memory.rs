use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Collection, Fields, Filter, Record, RecordStore, StoreError};

/// Store operations, used for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Update,
    Delete,
    GetOne,
    List,
}

struct Stored {
    seq: u64,
    record: Record,
}

#[derive(Default)]
struct Collections {
    next_seq: u64,
    records: HashMap<Collection, Vec<Stored>>,
}

/// A failure armed to fire on the n-th matching call.
struct ArmedFailure {
    op: Op,
    collection: Collection,
    remaining: usize,
    error: Option<StoreError>,
}

/// In-process `RecordStore`.
///
/// Every call is counted per operation and collection so tests can assert
/// exactly which remote reads and writes happened.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
    calls: Mutex<HashMap<(Op, Collection), usize>>,
    failures: Mutex<Vec<ArmedFailure>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `op` calls made against `collection` so far.
    pub fn calls(&self, op: Op, collection: Collection) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(&(op, collection)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Creates + updates + deletes across all collections.
    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|((op, _), _)| matches!(op, Op::Create | Op::Update | Op::Delete))
                    .map(|(_, n)| *n)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        if let Ok(mut c) = self.calls.lock() {
            c.clear();
        }
    }

    /// Make the `nth` (1-based) upcoming `op` on `collection` fail with `error`.
    pub fn fail_on(&self, op: Op, collection: Collection, nth: usize, error: StoreError) {
        if let Ok(mut f) = self.failures.lock() {
            f.push(ArmedFailure {
                op,
                collection,
                remaining: nth.max(1),
                error: Some(error),
            });
        }
    }

    /// Insert a record with a fixed id, bypassing call accounting.
    pub async fn seed(&self, collection: Collection, id: &str, fields: Fields) {
        let mut data = self.data.write().await;
        data.next_seq += 1;
        let seq = data.next_seq;
        data.records.entry(collection).or_default().push(Stored {
            seq,
            record: Record {
                id: id.to_string(),
                fields: stamped(fields, true),
            },
        });
    }

    /// All records of a collection in insertion order, bypassing call accounting.
    pub async fn snapshot(&self, collection: Collection) -> Vec<Record> {
        self.data
            .read()
            .await
            .records
            .get(&collection)
            .map(|rs| rs.iter().map(|s| s.record.clone()).collect())
            .unwrap_or_default()
    }

    fn record_call(&self, op: Op, collection: Collection) -> Result<(), StoreError> {
        if let Ok(mut c) = self.calls.lock() {
            *c.entry((op, collection)).or_insert(0) += 1;
        }
        let Ok(mut failures) = self.failures.lock() else {
            return Ok(());
        };
        let Some(pos) = failures
            .iter()
            .position(|f| f.op == op && f.collection == collection)
        else {
            return Ok(());
        };
        failures[pos].remaining -= 1;
        if failures[pos].remaining == 0 {
            let mut armed = failures.remove(pos);
            if let Some(err) = armed.error.take() {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn stamped(mut fields: Fields, created: bool) -> Fields {
    let now = Value::String(Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ").to_string());
    if created {
        fields.entry("created").or_insert_with(|| now.clone());
    }
    fields.insert("updated".to_string(), now);
    fields
}

fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()[..15].to_string()
}

fn compare_field(a: &Stored, b: &Stored, field: &str) -> Ordering {
    if field == "created" {
        return a.seq.cmp(&b.seq);
    }
    let ord = match (a.record.fields.get(field), b.record.fields.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    };
    ord.then(a.seq.cmp(&b.seq))
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, collection: Collection, fields: Fields) -> Result<Record, StoreError> {
        self.record_call(Op::Create, collection)?;
        let mut data = self.data.write().await;
        data.next_seq += 1;
        let seq = data.next_seq;
        let record = Record {
            id: new_record_id(),
            fields: stamped(fields, true),
        };
        data.records.entry(collection).or_default().push(Stored {
            seq,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        self.record_call(Op::Update, collection)?;
        let mut data = self.data.write().await;
        let stored = data
            .records
            .get_mut(&collection)
            .and_then(|rs| rs.iter_mut().find(|s| s.record.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })?;
        for (k, v) in stamped(fields, false) {
            stored.record.fields.insert(k, v);
        }
        Ok(stored.record.clone())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.record_call(Op::Delete, collection)?;
        let mut data = self.data.write().await;
        let records = data.records.entry(collection).or_default();
        let before = records.len();
        records.retain(|s| s.record.id != id);
        if records.len() == before {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_one(&self, collection: Collection, id: &str) -> Result<Record, StoreError> {
        self.record_call(Op::GetOne, collection)?;
        self.data
            .read()
            .await
            .records
            .get(&collection)
            .and_then(|rs| rs.iter().find(|s| s.record.id == id))
            .map(|s| s.record.clone())
            .ok_or_else(|| StoreError::NotFound {
                collection,
                id: id.to_string(),
            })
    }

    async fn get_full_list(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&str>,
    ) -> Result<Vec<Record>, StoreError> {
        self.record_call(Op::List, collection)?;
        let data = self.data.read().await;
        let mut matched: Vec<&Stored> = data
            .records
            .get(&collection)
            .map(|rs| rs.iter().filter(|s| filter.matches(&s.record)).collect())
            .unwrap_or_default();

        if let Some(sort) = sort.filter(|s| !s.is_empty()) {
            let (descending, field) = match sort.strip_prefix('-') {
                Some(field) => (true, field),
                None => (false, sort.strip_prefix('+').unwrap_or(sort)),
            };
            matched.sort_by(|a, b| {
                let ord = compare_field(a, b, field);
                if descending { ord.reverse() } else { ord }
            });
        }

        Ok(matched.into_iter().map(|s| s.record.clone()).collect())
    }
}
