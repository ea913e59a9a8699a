//! Cache Store Module
//!
//! Two-tier cache engine: a bounded in-memory map for reads, mirrored to
//! durable storage so entries survive a restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{
    CacheEntry, CacheKey, CacheStats, DurableRecord, DurableStorage, Freshness, FreshnessWindow,
    LruTracker,
};
use crate::clock::Clock;

// == Rehydrate Report ==
/// Outcome of loading durable entries at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrateReport {
    pub loaded: usize,
    pub expired: usize,
    pub corrupt: usize,
}

// == Cache Store ==
/// Two-tier store of query results keyed by [`CacheKey`].
///
/// Reads are served from memory only; the durable tier is written through on
/// every `put` and read back once by [`CacheStore::rehydrate`].
pub struct CacheStore {
    /// Memory tier
    entries: HashMap<CacheKey, CacheEntry>,
    /// LRU access tracker for the memory tier
    lru: LruTracker<CacheKey>,
    stats: CacheStats,
    /// Durable tier
    durable: Box<dyn DurableStorage>,
    /// Namespace for durable item names
    prefix: String,
    window: FreshnessWindow,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("prefix", &self.prefix)
            .field("window", &self.window)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store. Call [`CacheStore::rehydrate`] to load the
    /// durable tier.
    ///
    /// # Arguments
    /// * `window` - Freshness thresholds applied to every entry
    /// * `max_entries` - Capacity of the memory tier
    /// * `durable` - Durable tier backend
    /// * `prefix` - Namespace prepended to every durable item name
    /// * `clock` - Time source for entry ages
    pub fn new(
        window: FreshnessWindow,
        max_entries: usize,
        durable: Box<dyn DurableStorage>,
        prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            durable,
            prefix: prefix.into(),
            window,
            max_entries: max_entries.max(1),
            clock,
        }
    }

    // == Rehydrate ==
    /// Loads every durable entry younger than the stale window into memory.
    ///
    /// Entries past the stale window and entries that fail to parse are
    /// deleted from the durable tier, never loaded.
    pub fn rehydrate(&mut self) -> RehydrateReport {
        let mut report = RehydrateReport::default();
        let now = self.clock.now_ms();

        let mut loaded: Vec<(CacheKey, CacheEntry)> = Vec::new();
        for name in self.durable_names() {
            let raw = match self.durable.get_item(&name) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Durable cache read failed for {}: {}", name, e);
                    continue;
                }
            };

            let parsed = DurableRecord::parse(&raw).and_then(DurableRecord::into_entry);
            match parsed {
                Ok((key, entry)) if key.durable_name(&self.prefix) == name => {
                    if self.window.classify(entry.age_ms(now)) == Freshness::Expired {
                        report.expired += 1;
                        self.remove_durable(&name);
                    } else {
                        loaded.push((key, entry));
                    }
                }
                Ok(_) | Err(_) => {
                    report.corrupt += 1;
                    warn!("Discarding unreadable durable cache entry {}", name);
                    self.remove_durable(&name);
                }
            }
        }

        // Oldest first so the most recent writes end up most recently used.
        loaded.sort_by_key(|(_, entry)| entry.written_at());
        for (key, entry) in loaded {
            self.insert_memory(key, entry);
            report.loaded += 1;
        }

        info!(
            "Rehydrated cache: loaded={}, expired={}, corrupt={}",
            report.loaded, report.expired, report.corrupt
        );
        report
    }

    // == Lookup ==
    /// Returns the entry for `key` with its freshness, or None.
    ///
    /// An entry past the stale window is evicted from both tiers and reported
    /// as absent. Never fails.
    pub fn lookup(&mut self, key: &CacheKey) -> Option<(CacheEntry, Freshness)> {
        let Some(entry) = self.entries.get(key) else {
            self.stats.record_miss();
            return None;
        };

        let freshness = self.window.classify(entry.age_ms(self.clock.now_ms()));
        match freshness {
            Freshness::Expired => {
                debug!("Cache entry expired: {}", key);
                self.remove(key);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                None
            }
            Freshness::Fresh | Freshness::Stale => {
                let entry = entry.clone();
                if freshness == Freshness::Fresh {
                    self.stats.record_fresh_hit();
                } else {
                    self.stats.record_stale_hit();
                }
                self.lru.touch(key);
                Some((entry, freshness))
            }
        }
    }

    /// Returns the entry for `key` if it is still usable.
    pub fn get(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.lookup(key).map(|(entry, _)| entry)
    }

    // == Put ==
    /// Stores an entry in both tiers, replacing any previous entry.
    ///
    /// The memory tier is updated first and in one step; a durable failure
    /// is logged and leaves the memory tier authoritative.
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        let name = key.durable_name(&self.prefix);
        match serde_json::to_string(&entry.to_durable(&key)) {
            Ok(raw) => {
                if let Err(e) = self.durable.set_item(&name, &raw) {
                    warn!("Durable cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Durable cache encode failed for {}: {}", key, e),
        }
        self.insert_memory(key, entry);
    }

    // == Remove ==
    /// Removes one key from both tiers. Returns true if it was in memory.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        let existed = self.entries.remove(key).is_some();
        self.lru.remove(key);
        self.remove_durable(&key.durable_name(&self.prefix));
        self.stats.set_total_entries(self.entries.len());
        existed
    }

    // == Invalidate ==
    /// Removes every entry whose key matches `predicate`, across both tiers.
    ///
    /// Returns the number of distinct keys removed.
    pub fn invalidate(&mut self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let mut removed: HashSet<CacheKey> = self
            .entries
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }
        self.lru.retain(|k| !removed.contains(k));

        // Durable items may exist without a memory twin (e.g. a failed load).
        for name in self.durable_names() {
            let key = match self.durable.get_item(&name) {
                Ok(Some(raw)) => DurableRecord::parse(&raw)
                    .and_then(DurableRecord::into_entry)
                    .map(|(key, _)| key)
                    .ok(),
                Ok(None) => continue,
                Err(e) => {
                    warn!("Durable cache read failed for {}: {}", name, e);
                    continue;
                }
            };
            match key {
                Some(key) if predicate(&key) => {
                    self.remove_durable(&name);
                    removed.insert(key);
                }
                Some(_) => {}
                None => self.remove_durable(&name),
            }
        }

        let count = removed.len();
        self.stats.record_invalidations(count);
        self.stats.set_total_entries(self.entries.len());
        count
    }

    /// Removes every entry belonging to `dataset`, across both tiers.
    pub fn invalidate_dataset(&mut self, dataset: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.dataset != dataset);
        self.lru.retain(|k| k.dataset != dataset);
        let count = before - self.entries.len();

        let dataset_prefix = CacheKey::dataset_prefix(&self.prefix, dataset);
        let names: Vec<String> = self
            .durable_names()
            .into_iter()
            .filter(|name| name.starts_with(&dataset_prefix))
            .collect();
        for name in names {
            self.remove_durable(&name);
        }

        self.stats.record_invalidations(count);
        self.stats.set_total_entries(self.entries.len());
        count
    }

    // == Clear ==
    /// Wipes both tiers. Returns the number of memory entries dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        for name in self.durable_names() {
            self.remove_durable(&name);
        }
        self.stats.record_invalidations(count);
        self.stats.set_total_entries(0);
        count
    }

    // == Purge Expired ==
    /// Removes all entries past the stale window from both tiers.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let window = self.window;
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| window.classify(entry.age_ms(now)) == Freshness::Expired)
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired.len();
        for key in &expired {
            self.remove(key);
        }
        self.stats.record_expirations(count);
        count
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn window(&self) -> FreshnessWindow {
        self.window
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Memory-tier keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }

    // == Internal Helpers ==
    fn insert_memory(&mut self, key: CacheKey, entry: CacheEntry) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            if let Some(evicted) = self.lru.evict_oldest() {
                debug!("Evicting least recently used entry: {}", evicted);
                self.entries.remove(&evicted);
                self.remove_durable(&evicted.durable_name(&self.prefix));
                self.stats.record_eviction();
            }
        }
        self.lru.touch(&key);
        self.entries.insert(key, entry);
        self.stats.set_total_entries(self.entries.len());
    }

    fn durable_names(&self) -> Vec<String> {
        match self.durable.item_names() {
            Ok(names) => names
                .into_iter()
                .filter(|name| name.starts_with(&self.prefix))
                .collect(),
            Err(e) => {
                warn!("Durable cache listing failed: {}", e);
                Vec::new()
            }
        }
    }

    fn remove_durable(&self, name: &str) {
        if let Err(e) = self.durable.remove_item(name) {
            warn!("Durable cache delete failed for {}: {}", name, e);
        }
    }
}
