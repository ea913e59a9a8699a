//! Data Access Runtime
//!
//! Process-wide read-through pipeline: cache lookup, stale-while-revalidate,
//! coordinated fetches with timeout and retry, mutations and their
//! invalidation.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::access::{
    AccessSettings, MutationInvalidator, QueryOutcome, QueryRequest, QueryView, SweepReport,
};
use crate::cache::{CacheEntry, CacheKey, CacheStats, CacheStore, FilterSet, Freshness, YearMonth};
use crate::clock::Clock;
use crate::coordinator::{FetchTicket, RequestCoordinator};
use crate::error::DataError;
use crate::profile::{Caller, ProfileRecord, ProfileResolver};
use crate::query::{DatasetCatalog, QueryBuilder};
use crate::remote::{Mutation, RemoteStore, RetryPolicy};

struct Shared {
    store: Arc<RwLock<CacheStore>>,
    coordinator: RequestCoordinator,
    profiles: Arc<ProfileResolver>,
    invalidator: MutationInvalidator,
    catalog: DatasetCatalog,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    settings: AccessSettings,
}

// == Data Access ==
/// Handle to the shared cache runtime. Clones share one store, one
/// in-flight registry and one profile cache.
#[derive(Clone)]
pub struct DataAccess {
    shared: Arc<Shared>,
}

impl DataAccess {
    // == Constructor ==
    /// Builds the runtime around an already rehydrated store.
    pub fn new(
        store: CacheStore,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        settings: AccessSettings,
    ) -> Self {
        let store = Arc::new(RwLock::new(store));
        let coordinator = RequestCoordinator::new();
        let profiles = Arc::new(ProfileResolver::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            settings.profile_ttl,
            settings.retry,
        ));
        let invalidator = MutationInvalidator::new(
            Arc::clone(&store),
            coordinator.clone(),
            Arc::clone(&profiles),
        );

        Self {
            shared: Arc::new(Shared {
                store,
                coordinator,
                profiles,
                invalidator,
                catalog: settings.catalog.clone(),
                remote,
                clock,
                retry: settings.retry,
                settings,
            }),
        }
    }

    pub fn store(&self) -> Arc<RwLock<CacheStore>> {
        Arc::clone(&self.shared.store)
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.shared.catalog
    }

    pub fn invalidator(&self) -> &MutationInvalidator {
        &self.shared.invalidator
    }

    pub fn profiles(&self) -> &ProfileResolver {
        &self.shared.profiles
    }

    pub fn settings(&self) -> &AccessSettings {
        &self.shared.settings
    }

    /// Opens a per-component view bound to `caller`.
    pub fn view(&self, caller: Caller) -> QueryView {
        QueryView::new(self.clone(), caller)
    }

    // == Identity ==
    /// Exchanges an access token for a caller.
    pub async fn identify(&self, access_token: &str) -> Result<Caller, DataError> {
        self.shared.profiles.identify(access_token).await
    }

    pub async fn profile(&self, caller: &Caller) -> Result<ProfileRecord, DataError> {
        self.shared.profiles.resolve_profile(caller).await
    }

    pub fn key_for(&self, caller: &Caller, request: &QueryRequest) -> CacheKey {
        CacheKey::new(
            request.dataset.clone(),
            request.filters.clone(),
            request.page,
            request.page_size,
            caller.id.clone(),
        )
    }

    fn check_request(&self, request: &QueryRequest) -> Result<(), DataError> {
        self.shared.catalog.get(&request.dataset)?;
        if request.page == 0 || request.page_size == 0 {
            return Err(DataError::InvalidRequest(
                "page and page size start at 1".to_string(),
            ));
        }
        Ok(())
    }

    // == Cached ==
    /// Usable cached entry for the request, without fetching.
    pub async fn cached(
        &self,
        caller: &Caller,
        request: &QueryRequest,
    ) -> Option<(CacheEntry, Freshness)> {
        let key = self.key_for(caller, request);
        self.shared.store.write().await.lookup(&key)
    }

    // == Query ==
    /// Serves a page through the cache.
    ///
    /// Fresh entries are returned as-is. Stale entries are returned at once
    /// while a background refresh runs; its failures are only logged. With
    /// no usable entry the call waits on a coordinated fetch.
    pub async fn query(
        &self,
        caller: &Caller,
        request: &QueryRequest,
    ) -> Result<QueryOutcome, DataError> {
        self.check_request(request)?;

        match self.cached(caller, request).await {
            Some((entry, Freshness::Fresh)) => {
                debug!("Fresh hit for {}", self.key_for(caller, request));
                Ok(QueryOutcome::new(&entry, Freshness::Fresh))
            }
            Some((entry, freshness)) => {
                debug!("Stale hit for {}", self.key_for(caller, request));
                self.revalidate(caller, request);
                Ok(QueryOutcome::new(&entry, freshness))
            }
            None => {
                debug!("Miss for {}", self.key_for(caller, request));
                let entry = self.load(caller, request).await?;
                Ok(QueryOutcome::new(&entry, Freshness::Fresh))
            }
        }
    }

    /// Refreshes an entry in the background. Failures keep the current entry.
    pub fn revalidate(&self, caller: &Caller, request: &QueryRequest) {
        let this = self.clone();
        let caller = caller.clone();
        let request = request.clone();
        tokio::spawn(async move {
            if let Err(e) = this.load(&caller, &request).await {
                warn!(
                    "Background refresh of {} failed, keeping cached data: {}",
                    this.key_for(&caller, &request),
                    e
                );
            }
        });
    }

    // == Refetch ==
    /// Drops the request's entry and fetches it again, ignoring freshness.
    pub async fn refetch(
        &self,
        caller: &Caller,
        request: &QueryRequest,
    ) -> Result<QueryOutcome, DataError> {
        self.check_request(request)?;
        let key = self.key_for(caller, request);
        self.shared.store.write().await.remove(&key);
        let entry = self.load(caller, request).await?;
        Ok(QueryOutcome::new(&entry, Freshness::Fresh))
    }

    // == Load ==
    /// Fetches through the coordinator, joining any in-flight fetch for the
    /// same key. The result is cached unless the key was invalidated while
    /// the fetch ran.
    pub async fn load(
        &self,
        caller: &Caller,
        request: &QueryRequest,
    ) -> Result<CacheEntry, DataError> {
        let key = self.key_for(caller, request);
        let this = self.clone();
        let caller = caller.clone();
        let request = request.clone();
        let owned_key = key.clone();

        self.shared
            .coordinator
            .run(&key, move |ticket| async move {
                this.fetch_and_store(caller, request, owned_key, ticket)
                    .await
            })
            .await
    }

    async fn fetch_and_store(
        self,
        caller: Caller,
        request: QueryRequest,
        key: CacheKey,
        ticket: FetchTicket,
    ) -> Result<CacheEntry, DataError> {
        let profile = self.shared.profiles.resolve_profile(&caller).await?;
        let query = QueryBuilder::new(&self.shared.catalog).build(
            &request.dataset,
            &profile,
            &request.filters,
            request.page,
            request.page_size,
            self.shared.clock.today(),
        )?;

        info!("Fetching {}", key);
        let remote = Arc::clone(&self.shared.remote);
        let page = self
            .shared
            .retry
            .run(&format!("fetch {}", request.dataset), || {
                let remote = Arc::clone(&remote);
                let caller = caller.clone();
                let query = query.clone();
                async move { remote.fetch_page(&caller, &query).await }
            })
            .await?;

        let entry = CacheEntry::new(page.rows, page.total, self.shared.clock.now_ms());
        let mut store = self.shared.store.write().await;
        if self.shared.coordinator.is_current(&key, &ticket) {
            store.put(key, entry.clone());
        } else {
            info!("Not caching {}: invalidated while in flight", key);
        }
        Ok(entry)
    }

    // == Mutate ==
    /// Applies a write and, on success, invalidates the dataset.
    ///
    /// Writes are bounded by the fetch timeout but never retried. On failure
    /// nothing is invalidated.
    pub async fn mutate(
        &self,
        caller: &Caller,
        dataset: &str,
        mutation: &Mutation,
    ) -> Result<(), DataError> {
        let table = self.shared.catalog.get(dataset)?.table.clone();
        self.shared.profiles.resolve_profile(caller).await?;

        let timeout = self.shared.retry.timeout;
        tokio::time::timeout(timeout, self.shared.remote.apply(caller, &table, mutation))
            .await
            .map_err(|_| DataError::Timeout(timeout.as_millis() as u64))??;

        info!("Applied mutation to {}", dataset);
        self.shared.invalidator.invalidate(dataset).await;
        Ok(())
    }

    // == Month Counts ==
    /// Row counts per dataset for one reference month, scoped to the
    /// caller's role. Datasets are counted in parallel; one whose count
    /// fails counts as zero. Unknown dataset ids fail the whole call.
    pub async fn month_counts(
        &self,
        caller: &Caller,
        datasets: &[String],
        month: YearMonth,
    ) -> Result<BTreeMap<String, u64>, DataError> {
        for dataset in datasets {
            self.shared.catalog.get(dataset)?;
        }

        let profile = self.shared.profiles.resolve_profile(caller).await?;
        let filters = FilterSet::new().reference_month(month);
        let today = self.shared.clock.today();

        let builder = QueryBuilder::new(&self.shared.catalog);
        let queries = datasets
            .iter()
            .map(|dataset| {
                builder
                    .build(dataset, &profile, &filters, 1, 1, today)
                    .map(|query| (dataset, query))
            })
            .collect::<Result<Vec<_>, DataError>>()?;

        let remote = &self.shared.remote;
        let retry = self.shared.retry;
        let counts = queries.iter().map(|(dataset, query)| async move {
            let count = retry
                .run(&format!("count {dataset}"), move || remote.count(caller, query))
                .await
                .unwrap_or_else(|e| {
                    warn!("Counting {} for {} failed: {}", dataset, month, e);
                    0
                });
            (dataset.to_string(), count)
        });

        Ok(join_all(counts).await.into_iter().collect())
    }

    // == Session ==
    /// Forgets everything cached for one caller.
    pub async fn logout(&self, caller: &Caller) -> usize {
        self.shared.invalidator.invalidate_caller(&caller.id).await
    }

    /// Wipes the whole cache, every in-flight registration and every profile.
    pub async fn clear(&self) -> usize {
        self.shared.invalidator.clear().await
    }

    // == Expiry Sweep ==
    /// Drops cache entries past the stale window and identities past the
    /// profile TTL.
    pub async fn purge_expired(&self) -> SweepReport {
        let entries = self.shared.store.write().await.purge_expired();
        let identities = self.shared.profiles.purge_expired();
        SweepReport {
            entries,
            identities,
        }
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.shared.store.read().await.stats();
        stats.fetches = self.shared.coordinator.fetches();
        stats.joined = self.shared.coordinator.joined();
        stats
    }

    pub fn in_flight(&self) -> usize {
        self.shared.coordinator.in_flight()
    }
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("coordinator", &self.shared.coordinator)
            .field("datasets", &self.shared.catalog.len())
            .finish()
    }
}
