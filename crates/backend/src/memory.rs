//! In-process [`Persistence`] used by tests and local runs.
//!
//! Tables are plain vectors of JSON rows. Failures can be injected per
//! operation and table so multi-step workflows can be exercised against
//! a backend that breaks halfway through.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{BackendError, Filter, Persistence, Row, Select};

/// Table name used for failure injection on [`Persistence::ping`].
pub const PING_TARGET: &str = "_ping";

const PUBLIC_BASE: &str = "http://memory.local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    objects: HashMap<(String, String), StoredObject>,
    failures: HashSet<(Operation, String)>,
    last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores a row as-is, filling `id` and `created_at` when absent.
    pub fn seed(&self, table: &str, row: Value) -> Row {
        let mut row = match row {
            Value::Object(row) => row,
            _ => Row::new(),
        };
        let mut state = self.lock();
        fill_generated(&mut state, &mut row);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        row
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Makes every later `operation` against `table` fail until cleared.
    pub fn fail_on(&self, operation: Operation, table: &str) {
        self.lock().failures.insert((operation, table.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of persistence calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    fn begin(&self, state: &State, operation: Operation, table: &str) -> Result<(), BackendError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if state.failures.contains(&(operation, table.to_string())) {
            return Err(BackendError::Rejected {
                status: 500,
                message: format!("injected {:?} failure on {}", operation, table).to_lowercase(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryBackend {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, BackendError> {
        let state = self.lock();
        self.begin(&state, Operation::Select, &query.table)?;

        let mut rows = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if let Some(order) = query.order.as_ref() {
            rows.sort_by(|a, b| {
                let ordering = compare_nullable(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, BackendError> {
        let mut state = self.lock();
        self.begin(&state, Operation::Insert, table)?;

        fill_generated(&mut state, &mut row);
        let rows = state.tables.entry(table.to_string()).or_default();
        if let Some(id) = row.get("id")
            && rows.iter().any(|existing| existing.get("id") == Some(id))
        {
            return Err(BackendError::Rejected {
                status: 409,
                message: format!("duplicate key value violates unique constraint on {}", table),
            });
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        let mut state = self.lock();
        self.begin(&state, Operation::Update, table)?;
        if filters.is_empty() {
            return Err(BackendError::InvalidQuery(format!(
                "refusing unfiltered update on {}",
                table
            )));
        }

        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches_all(row, filters)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, BackendError> {
        let mut state = self.lock();
        self.begin(&state, Operation::Delete, table)?;
        if filters.is_empty() {
            return Err(BackendError::InvalidQuery(format!(
                "refusing unfiltered delete on {}",
                table
            )));
        }

        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !matches_all(row, filters));
        Ok(before - rows.len())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        self.begin(&state, Operation::Upload, bucket)?;

        let key = (bucket.to_string(), path.to_string());
        if state.objects.contains_key(&key) {
            return Err(BackendError::Rejected {
                status: 409,
                message: "The resource already exists".to_string(),
            });
        }
        state.objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", PUBLIC_BASE, bucket, path)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let state = self.lock();
        self.begin(&state, Operation::Select, PING_TARGET)
    }
}

fn fill_generated(state: &mut State, row: &mut Row) {
    if !row.get("id").is_some_and(|id| !id.is_null()) {
        row.insert(
            "id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    if !row.get("created_at").is_some_and(|ts| !ts.is_null()) {
        let ts = next_timestamp(state);
        row.insert(
            "created_at".to_string(),
            Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
    }
}

/// Strictly increasing so rows inserted back-to-back still order by creation.
fn next_timestamp(state: &mut State) -> DateTime<Utc> {
    let now = Utc::now();
    let ts = match state.last_timestamp {
        Some(last) if now <= last => last + chrono::Duration::microseconds(1),
        _ => now,
    };
    state.last_timestamp = Some(ts);
    ts
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches(row, filter))
}

fn matches(row: &Row, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { column, value } => {
            let actual = row.get(column).unwrap_or(&Value::Null);
            values_equal(actual, value)
        }
        Filter::In { column, values } => {
            let actual = row.get(column).unwrap_or(&Value::Null);
            values.iter().any(|value| values_equal(actual, value))
        }
        Filter::IlikeAny { columns, needle } => {
            let needle = needle.to_lowercase();
            columns.iter().any(|column| {
                row.get(column)
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| s.to_lowercase().contains(&needle))
            })
        }
    }
}

/// Filter values arrive as query-string text on the wire, so `"true"` matches `true`.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s == if *b { "true" } else { "false" }
        }
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => false,
    }
}

/// Nulls sort after every value, ascending.
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
