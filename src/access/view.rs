//! Query View
//!
//! Per-component handle over the shared runtime. Tracks one active query and
//! publishes its state (`data`, `total`, `loading`, `error`) on a watch
//! channel. Results for a query the component has moved away from, or that
//! arrive after the component unmounted, are dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::access::{DataAccess, QueryRequest};
use crate::cache::{CacheEntry, Freshness, Record};
use crate::error::DataError;
use crate::profile::Caller;
use crate::remote::Mutation;

// == Phase ==
/// Lifecycle of one logical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing loaded yet, or invalidated
    Empty,
    /// First load in progress
    Loading,
    Ready,
    /// Served from a stale entry; a refresh is running
    Stale,
    /// Last fetch failed; earlier data, if any, is kept
    Error,
}

// == Query Snapshot ==
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    pub data: Arc<Vec<Record>>,
    pub total: u64,
    pub loading: bool,
    pub error: Option<DataError>,
    pub phase: Phase,
}

impl Default for QuerySnapshot {
    fn default() -> Self {
        Self {
            data: Arc::new(Vec::new()),
            total: 0,
            loading: false,
            error: None,
            phase: Phase::Empty,
        }
    }
}

struct ViewInner {
    access: DataAccess,
    caller: Caller,
    state: watch::Sender<QuerySnapshot>,
    active: Mutex<Option<QueryRequest>>,
    mounted: AtomicBool,
    /// Bumped on every query start; pending debounced requests compare
    /// against it before firing.
    generation: AtomicU64,
}

impl ViewInner {
    fn is_active(&self, request: &QueryRequest) -> bool {
        self.mounted.load(Ordering::SeqCst)
            && self
                .active
                .lock()
                .map(|active| active.as_ref() == Some(request))
                .unwrap_or(false)
    }

    fn activate(&self, request: &QueryRequest) {
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = Some(request.clone());
    }

    fn active(&self) -> Option<QueryRequest> {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn publish_entry(&self, request: &QueryRequest, entry: &CacheEntry, freshness: Freshness) {
        self.publish(request, Arc::clone(entry.payload()), entry.total(), freshness);
    }

    fn publish(
        &self,
        request: &QueryRequest,
        data: Arc<Vec<Record>>,
        total: u64,
        freshness: Freshness,
    ) {
        if !self.is_active(request) {
            debug!("Dropping result for inactive query on {}", request.dataset);
            return;
        }
        let phase = match freshness {
            Freshness::Stale => Phase::Stale,
            Freshness::Fresh | Freshness::Expired => Phase::Ready,
        };
        self.state.send_replace(QuerySnapshot {
            data,
            total,
            loading: false,
            error: None,
            phase,
        });
    }

    fn publish_loading(&self, request: &QueryRequest) {
        if !self.is_active(request) {
            return;
        }
        self.state.send_modify(|snapshot| {
            snapshot.loading = true;
            if snapshot.data.is_empty() && snapshot.phase != Phase::Error {
                snapshot.phase = Phase::Loading;
            }
        });
    }

    fn publish_error(&self, request: &QueryRequest, error: DataError) {
        if !self.is_active(request) {
            return;
        }
        self.state.send_modify(|snapshot| {
            snapshot.loading = false;
            snapshot.error = Some(error);
            snapshot.phase = Phase::Error;
        });
    }

    /// Activates `request` and runs it, rejecting malformed requests
    /// without touching the cache.
    async fn start(self: &Arc<Self>, request: QueryRequest) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.activate(&request);

        if let Err(e) = self.access.catalog().get(&request.dataset) {
            self.publish_error(&request, e);
            return;
        }
        if request.page == 0 || request.page_size == 0 {
            self.publish_error(
                &request,
                DataError::InvalidRequest("page and page size start at 1".to_string()),
            );
            return;
        }
        self.run(request, false).await;
    }

    // == Run ==
    async fn run(self: &Arc<Self>, request: QueryRequest, force: bool) {
        if force {
            self.publish_loading(&request);
            match self.access.refetch(&self.caller, &request).await {
                Ok(outcome) => {
                    self.publish(&request, outcome.data, outcome.total, outcome.freshness)
                }
                Err(e) => self.publish_error(&request, e),
            }
            return;
        }

        match self.access.cached(&self.caller, &request).await {
            Some((entry, Freshness::Fresh)) => {
                self.publish_entry(&request, &entry, Freshness::Fresh);
            }
            Some((entry, freshness)) => {
                self.publish_entry(&request, &entry, freshness);
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    match inner.access.load(&inner.caller, &request).await {
                        Ok(entry) => inner.publish_entry(&request, &entry, Freshness::Fresh),
                        Err(e) => warn!(
                            "Background refresh of {} failed, keeping cached data: {}",
                            request.dataset, e
                        ),
                    }
                });
            }
            None => {
                self.publish_loading(&request);
                match self.access.load(&self.caller, &request).await {
                    Ok(entry) => self.publish_entry(&request, &entry, Freshness::Fresh),
                    Err(e) => self.publish_error(&request, e),
                }
            }
        }
    }
}

// == Query View ==
/// Dropping the view unmounts it.
pub struct QueryView {
    inner: Arc<ViewInner>,
}

impl QueryView {
    pub(crate) fn new(access: DataAccess, caller: Caller) -> Self {
        let (state, _) = watch::channel(QuerySnapshot::default());
        Self {
            inner: Arc::new(ViewInner {
                access,
                caller,
                state,
                active: Mutex::new(None),
                mounted: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
        }
    }

    // == Query ==
    /// Makes `request` the active query and runs it now.
    ///
    /// Cached entries are published without waiting; a stale one also
    /// starts a refresh that promotes the view back to `Ready`. A failed
    /// fetch keeps previously displayed data.
    pub async fn query(&self, request: QueryRequest) -> QuerySnapshot {
        self.inner.start(request).await;
        self.snapshot()
    }

    // == Request ==
    /// Debounced [`query`](Self::query): only the last request made within
    /// the debounce window runs.
    pub fn request(&self, request: QueryRequest) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let debounce = self.inner.access.settings().debounce;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if inner.generation.load(Ordering::SeqCst) != generation
                || !inner.mounted.load(Ordering::SeqCst)
            {
                return;
            }
            inner.start(request).await;
        });
    }

    // == Refetch ==
    /// Re-runs the active query, ignoring freshness.
    pub async fn refetch(&self) -> QuerySnapshot {
        if let Some(request) = self.inner.active() {
            self.inner.run(request, true).await;
        }
        self.snapshot()
    }

    // == Mutate ==
    /// Applies a write. On success the dataset is invalidated and, if it is
    /// the dataset on display, the active query runs again.
    pub async fn mutate(&self, dataset: &str, mutation: Mutation) -> bool {
        match self
            .inner
            .access
            .mutate(&self.inner.caller, dataset, &mutation)
            .await
        {
            Ok(()) => {
                if let Some(request) = self.inner.active().filter(|r| r.dataset == dataset) {
                    self.inner.run(request, false).await;
                }
                true
            }
            Err(e) => {
                warn!("Mutation on {} failed: {}", dataset, e);
                false
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QuerySnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn caller(&self) -> &Caller {
        &self.inner.caller
    }

    /// Stops applying results. Pending debounced requests are dropped.
    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }
}

impl Drop for QueryView {
    fn drop(&mut self) {
        self.unmount();
    }
}
