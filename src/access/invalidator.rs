//! Mutation Invalidator
//!
//! Keeps cached reads consistent with writes: dataset-wide invalidation after
//! a mutation, caller-scoped purge on logout, and the global clear.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::cache::CacheStore;
use crate::coordinator::RequestCoordinator;
use crate::profile::ProfileResolver;

#[derive(Clone)]
pub struct MutationInvalidator {
    store: Arc<RwLock<CacheStore>>,
    coordinator: RequestCoordinator,
    profiles: Arc<ProfileResolver>,
}

impl MutationInvalidator {
    pub fn new(
        store: Arc<RwLock<CacheStore>>,
        coordinator: RequestCoordinator,
        profiles: Arc<ProfileResolver>,
    ) -> Self {
        Self {
            store,
            coordinator,
            profiles,
        }
    }

    // == Invalidate ==
    /// Drops every entry of `dataset` from both tiers and outdates its
    /// in-flight fetches. Returns the number of memory entries dropped.
    ///
    /// Fetches already running still answer their waiters, but their result
    /// is not written back.
    pub async fn invalidate(&self, dataset: &str) -> usize {
        let mut store = self.store.write().await;
        let removed = store.invalidate_dataset(dataset);
        self.coordinator.forget_dataset(dataset);
        info!("Invalidated dataset {}: {} entries removed", dataset, removed);
        removed
    }

    /// Drops one caller's entries and cached profile.
    pub async fn invalidate_caller(&self, caller_id: &str) -> usize {
        let mut store = self.store.write().await;
        let removed = store.invalidate(|key| key.caller == caller_id);
        self.coordinator.forget_caller(caller_id);
        self.profiles.invalidate(caller_id);
        info!("Purged caller {}: {} entries removed", caller_id, removed);
        removed
    }

    // == Clear ==
    /// Wipes every dataset, in-flight registration and cached profile.
    pub async fn clear(&self) -> usize {
        let mut store = self.store.write().await;
        let removed = store.clear();
        self.coordinator.clear();
        self.profiles.clear();
        info!("Cache cleared: {} entries removed", removed);
        removed
    }
}

impl std::fmt::Debug for MutationInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationInvalidator")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
