//! In-Memory Remote Store
//!
//! Local tables that answer the same queries the managed backend would:
//! filters over dotted paths into joined parent objects, descending order,
//! page windows and exact counts. Counters, latency, injected failures and a
//! fetch gate make it usable as a test double.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cache::Record;
use crate::error::DataError;
use crate::profile::Caller;
use crate::query::{Filter, QueryDescriptor, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::remote::{Mutation, Page, ProfileRow, RemoteStore};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    profiles: RwLock<HashMap<String, ProfileRow>>,
    /// access token -> caller id
    sessions: RwLock<HashMap<String, String>>,

    fetches: Mutex<HashMap<String, u64>>,
    profile_lookups: AtomicU64,
    identify_calls: AtomicU64,
    next_id: AtomicU64,

    latency: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<DataError>>,
    reject_writes: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // == Seeding ==
    /// Appends rows to `table`. Non-object values are skipped.
    pub fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.write().unwrap_or_else(|p| p.into_inner());
        let target = tables.entry(table.to_string()).or_default();
        target.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(record) => Some(record),
            _ => None,
        }));
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Adds or replaces a caller's profile.
    pub fn add_profile(&self, caller_id: &str, row: ProfileRow) {
        self.profiles
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(caller_id.to_string(), row);
    }

    pub fn add_session(&self, access_token: &str, caller_id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(access_token.to_string(), caller_id.to_string());
    }

    pub fn revoke_session(&self, access_token: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(access_token);
    }

    // == Instrumentation ==
    /// Total page and count requests served.
    pub fn fetch_count(&self) -> u64 {
        self.fetches
            .lock()
            .map(|fetches| fetches.values().sum())
            .unwrap_or(0)
    }

    /// Page and count requests served for one table.
    pub fn fetch_count_for(&self, table: &str) -> u64 {
        self.fetches
            .lock()
            .ok()
            .and_then(|fetches| fetches.get(table).copied())
            .unwrap_or(0)
    }

    pub fn profile_lookups(&self) -> u64 {
        self.profile_lookups.load(Ordering::SeqCst)
    }

    pub fn identify_calls(&self) -> u64 {
        self.identify_calls.load(Ordering::SeqCst)
    }

    /// Delays every page and count request.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|p| p.into_inner()) = latency;
    }

    /// Makes the next page or count request fail with `error`. Queued
    /// failures are consumed in order.
    pub fn fail_next(&self, error: DataError) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(error);
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Parks every subsequent page and count request until
    /// [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        *self.gate.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_fetches(&self) {
        if let Some(gate) = self.gate.lock().unwrap_or_else(|p| p.into_inner()).take() {
            gate.close();
        }
    }

    async fn serve(&self, table: &str) -> Result<(), DataError> {
        *self
            .fetches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(table.to_string())
            .or_default() += 1;

        let gate = self.gate.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(gate) = gate {
            // Closed means released
            let _ = gate.acquire().await;
        }

        let latency = *self.latency.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn matching(&self, query: &QueryDescriptor) -> Vec<Record> {
        let tables = self.tables.read().unwrap_or_else(|p| p.into_inner());
        let Some(rows) = tables.get(&query.table) else {
            return Vec::new();
        };

        let mut matched: Vec<Record> = rows
            .iter()
            .filter(|row| match &query.join {
                Some(join) => matches!(row.get(&join.relation), Some(Value::Object(_))),
                None => true,
            })
            .filter(|row| query.filters.iter().all(|filter| passes(row, filter)))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            for order in &query.order {
                let ordering =
                    compare_values(resolve(a, &order.column), resolve(b, &order.column));
                let ordering = if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != CmpOrdering::Equal {
                    return ordering;
                }
            }
            CmpOrdering::Equal
        });
        matched
    }
}

/// Walks a dotted path through nested objects.
fn resolve<'a>(row: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = row.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn passes(row: &Record, filter: &Filter) -> bool {
    let Some(actual) = resolve(row, filter.column()).and_then(scalar_text) else {
        return false;
    };
    match filter {
        Filter::Eq { value, .. } => actual == *value,
        Filter::Gte { value, .. } => actual.as_str() >= value.as_str(),
        Filter::Lte { value, .. } => actual.as_str() <= value.as_str(),
    }
}

/// Orders present values before missing ones, numbers numerically and
/// everything else by its text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(x), Some(y)) => scalar_text(x).cmp(&scalar_text(y)),
    }
}

fn same_id(row: &Record, id: &str) -> bool {
    row.get(ID_COLUMN).and_then(scalar_text).as_deref() == Some(id)
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn identify(&self, access_token: &str) -> Result<String, DataError> {
        self.identify_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(access_token)
            .cloned()
            .ok_or(DataError::AuthExpired)
    }

    async fn fetch_profile(&self, caller: &Caller) -> Result<Option<ProfileRow>, DataError> {
        self.profile_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&caller.id)
            .cloned())
    }

    async fn fetch_page(
        &self,
        _caller: &Caller,
        query: &QueryDescriptor,
    ) -> Result<Page, DataError> {
        self.serve(&query.table).await?;

        let matched = self.matching(query);
        let total = matched.len() as u64;
        let rows = matched
            .into_iter()
            .skip(query.range.offset as usize)
            .take(query.range.limit() as usize)
            .collect();

        debug!("Served {} page of {} rows", query.table, total);
        Ok(Page { rows, total })
    }

    async fn count(&self, _caller: &Caller, query: &QueryDescriptor) -> Result<u64, DataError> {
        self.serve(&query.table).await?;
        Ok(self.matching(query).len() as u64)
    }

    async fn apply(
        &self,
        _caller: &Caller,
        table: &str,
        mutation: &Mutation,
    ) -> Result<(), DataError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(DataError::Mutation(format!("writes to {table} rejected")));
        }

        let now = Value::String(Utc::now().to_rfc3339());
        let mut tables = self.tables.write().unwrap_or_else(|p| p.into_inner());
        let rows = tables.entry(table.to_string()).or_default();

        match mutation {
            Mutation::Create { record } => {
                let mut record = record.clone();
                if !record.contains_key(ID_COLUMN) {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    record.insert(ID_COLUMN.to_string(), Value::String(format!("mem-{id}")));
                }
                record
                    .entry(CREATED_AT_COLUMN.to_string())
                    .or_insert(now);
                rows.push(record);
            }
            Mutation::Update { id, changes } => {
                let row = rows
                    .iter_mut()
                    .find(|row| same_id(row, id))
                    .ok_or_else(|| DataError::Mutation(format!("no {table} row with id {id}")))?;
                for (column, value) in changes {
                    row.insert(column.clone(), value.clone());
                }
                row.insert(UPDATED_AT_COLUMN.to_string(), now);
            }
            Mutation::Delete { id } => {
                let before = rows.len();
                rows.retain(|row| !same_id(row, id));
                if rows.len() == before {
                    return Err(DataError::Mutation(format!("no {table} row with id {id}")));
                }
            }
        }
        Ok(())
    }
}
