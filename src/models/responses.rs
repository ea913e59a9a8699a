//! Response DTOs for the gateway API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::access::{QueryOutcome, QueryRequest};
use crate::cache::{CacheStats, Freshness, Record, YearMonth};

/// Response body for `GET /datasets/:dataset` and its refetch.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetPageResponse {
    pub dataset: String,
    pub page: u32,
    pub page_size: u32,
    /// Exact number of rows matching the filters, across all pages
    pub total: u64,
    pub freshness: Freshness,
    /// When the page was fetched, Unix milliseconds
    pub fetched_at: i64,
    pub data: Arc<Vec<Record>>,
}

impl DatasetPageResponse {
    pub fn new(request: &QueryRequest, outcome: QueryOutcome) -> Self {
        Self {
            dataset: request.dataset.clone(),
            page: request.page,
            page_size: request.page_size,
            total: outcome.total,
            freshness: outcome.freshness,
            fetched_at: outcome.written_at,
            data: outcome.data,
        }
    }
}

/// Response body for record writes.
#[derive(Debug, Clone, Serialize)]
pub struct MutationResponse {
    pub message: String,
    pub dataset: String,
}

impl MutationResponse {
    pub fn new(dataset: impl Into<String>, action: &str) -> Self {
        let dataset = dataset.into();
        Self {
            message: format!("Record {} in '{}'; cached pages invalidated", action, dataset),
            dataset,
        }
    }
}

/// Response body for `GET /counts`.
#[derive(Debug, Clone, Serialize)]
pub struct CountsResponse {
    pub month: YearMonth,
    pub counts: BTreeMap<String, u64>,
}

/// Response body for logout and cache clear.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeResponse {
    pub message: String,
    /// Entries removed from the cache
    pub removed: usize,
}

impl PurgeResponse {
    pub fn new(scope: &str, removed: usize) -> Self {
        Self {
            message: format!("Purged {} cached entries for {}", removed, scope),
            removed,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Fraction of reads answered from cache
    pub hit_rate: f64,
    /// Fetches currently in flight
    pub in_flight: usize,
}

impl StatsResponse {
    pub fn new(stats: CacheStats, in_flight: usize) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
            in_flight,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Which remote store backs the cache
    pub backend: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy(backend: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            backend: backend.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;

    #[test]
    fn test_page_response_serialize() {
        let entry = CacheEntry::new(
            vec![json!({"id": 1}).as_object().cloned().unwrap()],
            41,
            1_700_000_000_000,
        );
        let request = QueryRequest::new("occurrences").page(3, 20);
        let resp = DatasetPageResponse::new(&request, QueryOutcome::new(&entry, Freshness::Stale));

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["dataset"], "occurrences");
        assert_eq!(value["page"], 3);
        assert_eq!(value["total"], 41);
        assert_eq!(value["freshness"], "stale");
        assert_eq!(value["data"][0]["id"], 1);
    }

    #[test]
    fn test_stats_response_flattens_counters() {
        let stats = CacheStats {
            fresh_hits: 6,
            stale_hits: 2,
            misses: 2,
            ..CacheStats::default()
        };
        let resp = StatsResponse::new(stats, 1);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["fresh_hits"], 6);
        assert_eq!(value["in_flight"], 1);
    }

    #[test]
    fn test_purge_and_mutation_messages() {
        let purge = PurgeResponse::new("caller u1", 3);
        assert!(purge.message.contains('3'));

        let mutation = MutationResponse::new("occurrences", "deleted");
        let json = serde_json::to_string(&mutation).unwrap();
        assert!(json.contains("occurrences"));
        assert!(json.contains("invalidated"));
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy("memory");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("memory"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Session expired");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Session expired"));
    }
}
