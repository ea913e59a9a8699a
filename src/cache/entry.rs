//! Cache Entry Module
//!
//! Defines one cached page of records, the freshness thresholds that govern
//! it, and its durable on-disk shape.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::CacheKey;
use crate::error::DataError;

/// One row returned by the remote store.
pub type Record = Map<String, Value>;

// == Cache Entry ==
/// A page of records plus the exact row count reported alongside it.
///
/// Entries are immutable: a refresh replaces the entry wholesale, and clones
/// share the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    payload: Arc<Vec<Record>>,
    total: u64,
    written_at: i64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with the given write time (Unix milliseconds).
    pub fn new(payload: Vec<Record>, total: u64, written_at: i64) -> Self {
        Self {
            payload: Arc::new(payload),
            total,
            written_at,
        }
    }

    pub fn payload(&self) -> &Arc<Vec<Record>> {
        &self.payload
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn written_at(&self) -> i64 {
        self.written_at
    }

    /// Age in milliseconds at `now_ms`; never negative.
    pub fn age_ms(&self, now_ms: i64) -> u64 {
        now_ms.saturating_sub(self.written_at).max(0) as u64
    }

    // == Durable Conversion ==
    pub fn to_durable(&self, key: &CacheKey) -> DurableRecord {
        DurableRecord {
            key: key.storage_key(),
            data: self.payload.as_ref().clone(),
            timestamp: self.written_at,
            total: self.total,
        }
    }
}

// == Durable Record ==
/// Shape of an entry in durable storage:
/// `{ key, data, timestamp, total }` with `timestamp` in epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableRecord {
    pub key: String,
    pub data: Vec<Record>,
    pub timestamp: i64,
    pub total: u64,
}

impl DurableRecord {
    pub fn parse(raw: &str) -> Result<Self, DataError> {
        serde_json::from_str(raw).map_err(|e| DataError::Parse(e.to_string()))
    }

    /// Splits the record into its key and an in-memory entry.
    pub fn into_entry(self) -> Result<(CacheKey, CacheEntry), DataError> {
        let key = CacheKey::from_storage_key(&self.key)?;
        Ok((key, CacheEntry::new(self.data, self.total, self.timestamp)))
    }
}

// == Freshness ==
/// Where an entry sits relative to the freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Usable as-is
    Fresh,
    /// Usable while a background revalidation runs
    Stale,
    /// Must not be served; evict and block on a new fetch
    Expired,
}

// == Freshness Window ==
/// The two named thresholds: `fresh_for` < `stale_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    fresh_for: Duration,
    stale_for: Duration,
}

impl FreshnessWindow {
    pub fn new(fresh_for: Duration, stale_for: Duration) -> Result<Self, DataError> {
        if fresh_for >= stale_for {
            return Err(DataError::InvalidRequest(format!(
                "fresh window ({fresh_for:?}) must be shorter than stale window ({stale_for:?})"
            )));
        }
        Ok(Self {
            fresh_for,
            stale_for,
        })
    }

    pub fn fresh_for(&self) -> Duration {
        self.fresh_for
    }

    pub fn stale_for(&self) -> Duration {
        self.stale_for
    }

    // == Classify ==
    /// Classifies an entry age.
    ///
    /// Boundary condition: an age equal to a threshold already belongs to the
    /// next state, so an entry is stale once `fresh_for` has fully elapsed.
    pub fn classify(&self, age_ms: u64) -> Freshness {
        if age_ms < self.fresh_for.as_millis() as u64 {
            Freshness::Fresh
        } else if age_ms < self.stale_for.as_millis() as u64 {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self {
            fresh_for: Duration::from_secs(5 * 60),
            stale_for: Duration::from_secs(15 * 60),
        }
    }
}
