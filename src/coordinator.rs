//! Request Coordinator
//!
//! Collapses concurrent fetches for the same cache key into one in-flight
//! request whose result every waiter shares. Also tracks invalidation
//! epochs so a fetch that started before an invalidation does not write its
//! now-outdated result back into the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey};
use crate::error::DataError;

type SharedFetch = Shared<BoxFuture<'static, Result<CacheEntry, DataError>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

/// Invalidation state observed when a fetch started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    dataset_epoch: u64,
    caller_epoch: u64,
}

#[derive(Default)]
struct Epochs {
    /// Bumped by a global clear
    generation: u64,
    datasets: HashMap<String, u64>,
    callers: HashMap<String, u64>,
}

#[derive(Default)]
struct Inner {
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    epochs: Mutex<Epochs>,
    next_id: AtomicU64,
    fetches: AtomicU64,
    joined: AtomicU64,
}

impl Inner {
    fn deregister(&self, key: &CacheKey, id: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if in_flight.get(key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(key);
        }
    }
}

// == Request Coordinator ==
#[derive(Clone, Default)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // == Run ==
    /// Returns the result of the in-flight fetch for `key`, starting one with
    /// `producer` if none is registered.
    ///
    /// The producer receives the [`FetchTicket`] taken at registration and
    /// should only write the cache if [`is_current`](Self::is_current) still
    /// holds for it. The fetch is driven to completion on its own task even if
    /// every caller stops waiting, and is deregistered before any waiter
    /// observes its result.
    pub async fn run<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<CacheEntry, DataError>
    where
        F: FnOnce(FetchTicket) -> Fut,
        Fut: Future<Output = Result<CacheEntry, DataError>> + Send + 'static,
    {
        let fetch = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(|p| p.into_inner());

            if let Some(existing) = in_flight.get(key) {
                self.inner.joined.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight fetch for {}", key);
                existing.fetch.clone()
            } else {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                self.inner.fetches.fetch_add(1, Ordering::Relaxed);

                let work = producer(self.ticket(key));
                let inner = Arc::clone(&self.inner);
                let owned_key = key.clone();
                let fetch = async move {
                    let result = work.await;
                    inner.deregister(&owned_key, id);
                    result
                }
                .boxed()
                .shared();

                in_flight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        fetch: fetch.clone(),
                    },
                );
                tokio::spawn(fetch.clone());
                fetch
            }
        };

        fetch.await
    }

    // == Epochs ==
    /// Snapshot of the invalidation state relevant to `key`.
    pub fn ticket(&self, key: &CacheKey) -> FetchTicket {
        let epochs = self.inner.epochs.lock().unwrap_or_else(|p| p.into_inner());
        FetchTicket {
            generation: epochs.generation,
            dataset_epoch: epochs.datasets.get(&key.dataset).copied().unwrap_or(0),
            caller_epoch: epochs.callers.get(&key.caller).copied().unwrap_or(0),
        }
    }

    /// True when nothing touching `key` was invalidated since `ticket`.
    pub fn is_current(&self, key: &CacheKey, ticket: &FetchTicket) -> bool {
        self.ticket(key) == *ticket
    }

    /// Marks a dataset as changed and drops its in-flight registrations, so
    /// later requests start a fresh fetch.
    pub fn forget_dataset(&self, dataset: &str) {
        {
            let mut epochs = self.inner.epochs.lock().unwrap_or_else(|p| p.into_inner());
            *epochs.datasets.entry(dataset.to_string()).or_default() += 1;
        }
        self.deregister_where(|key| key.dataset == dataset);
    }

    /// Same as [`forget_dataset`](Self::forget_dataset), for one caller's keys.
    pub fn forget_caller(&self, caller_id: &str) {
        {
            let mut epochs = self.inner.epochs.lock().unwrap_or_else(|p| p.into_inner());
            *epochs.callers.entry(caller_id.to_string()).or_default() += 1;
        }
        self.deregister_where(|key| key.caller == caller_id);
    }

    /// Drops every registration and outdates every ticket.
    pub fn clear(&self) {
        self.inner
            .epochs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .generation += 1;
        self.deregister_where(|_| true);
    }

    fn deregister_where(&self, predicate: impl Fn(&CacheKey) -> bool) {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let before = in_flight.len();
        in_flight.retain(|key, _| !predicate(key));
        let dropped = before - in_flight.len();
        if dropped > 0 {
            debug!("Dropped {} in-flight registrations", dropped);
        }
    }

    // == Counters ==
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .map(|in_flight| in_flight.len())
            .unwrap_or(0)
    }

    /// Fetches actually started.
    pub fn fetches(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }

    /// Requests that joined an already in-flight fetch.
    pub fn joined(&self) -> u64 {
        self.inner.joined.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("in_flight", &self.in_flight())
            .field("fetches", &self.fetches())
            .field("joined", &self.joined())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FilterSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn key(dataset: &str, caller: &str) -> CacheKey {
        CacheKey::new(dataset, FilterSet::new(), 1, 10, caller)
    }

    fn entry(total: u64) -> CacheEntry {
        CacheEntry::new(Vec::new(), total, 0)
    }

    // == Deduplication ==

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let coordinator = RequestCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("occurrences", "u1");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .run(&k, move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(entry(7))
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().total(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.fetches(), 1);
        assert_eq!(coordinator.joined(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reach_every_waiter() {
        let coordinator = RequestCoordinator::new();
        let k = key("occurrences", "u1");

        let slow = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(DataError::Network("down".into()))
        };
        let (first, second) = tokio::join!(
            coordinator.run(&k, |_| slow),
            coordinator.run(&k, |_| async { Ok(entry(1)) }),
        );

        assert_eq!(first, Err(DataError::Network("down".into())));
        assert_eq!(second, Err(DataError::Network("down".into())));
    }

    #[tokio::test]
    async fn test_deregistered_before_result_is_seen() {
        let coordinator = RequestCoordinator::new();
        let k = key("occurrences", "u1");

        coordinator.run(&k, |_| async { Ok(entry(1)) }).await.unwrap();
        assert_eq!(coordinator.in_flight(), 0);

        // A later request is not served by the finished fetch
        let again = coordinator.run(&k, |_| async { Ok(entry(2)) }).await;
        assert_eq!(again.unwrap().total(), 2);
        assert_eq!(coordinator.fetches(), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_independently() {
        let coordinator = RequestCoordinator::new();
        let first = key("occurrences", "u1");
        let second = key("occurrences", "u2");

        let (a, b) = tokio::join!(
            coordinator.run(&first, |_| async { Ok(entry(1)) }),
            coordinator.run(&second, |_| async { Ok(entry(2)) }),
        );

        assert_eq!(a.unwrap().total(), 1);
        assert_eq!(b.unwrap().total(), 2);
        assert_eq!(coordinator.joined(), 0);
    }

    // == Abandonment ==

    #[tokio::test(start_paused = true)]
    async fn test_fetch_completes_when_caller_goes_away() {
        let coordinator = RequestCoordinator::new();
        let k = key("occurrences", "u1");
        let (done_tx, done_rx) = oneshot::channel();

        let waiter = {
            let coordinator = coordinator.clone();
            let k = k.clone();
            tokio::spawn(async move {
                coordinator
                    .run(&k, move |_| async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        let _ = done_tx.send(());
                        Ok(entry(3))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        assert!(done_rx.await.is_ok());
        tokio::task::yield_now().await;
        assert_eq!(coordinator.in_flight(), 0);
    }

    // == Epochs ==

    #[test]
    fn test_tickets_outdated_by_invalidation() {
        let coordinator = RequestCoordinator::new();
        let k = key("occurrences", "u1");
        let other = key("trainingHours", "u1");

        let ticket = coordinator.ticket(&k);
        let other_ticket = coordinator.ticket(&other);
        coordinator.forget_dataset("occurrences");
        assert!(!coordinator.is_current(&k, &ticket));
        assert!(coordinator.is_current(&other, &other_ticket));

        let ticket = coordinator.ticket(&k);
        coordinator.forget_caller("u2");
        assert!(coordinator.is_current(&k, &ticket));
        coordinator.forget_caller("u1");
        assert!(!coordinator.is_current(&k, &ticket));

        let ticket = coordinator.ticket(&other);
        coordinator.clear();
        assert!(!coordinator.is_current(&other, &ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_starts_fresh_fetch() {
        let coordinator = RequestCoordinator::new();
        let k = key("occurrences", "u1");

        let first = {
            let coordinator = coordinator.clone();
            let k = k.clone();
            tokio::spawn(async move {
                coordinator
                    .run(&k, |ticket| async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(entry(ticket.dataset_epoch))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(coordinator.in_flight(), 1);

        coordinator.forget_dataset("occurrences");
        assert_eq!(coordinator.in_flight(), 0);

        let second = coordinator
            .run(&k, |ticket| async move { Ok(entry(ticket.dataset_epoch)) })
            .await
            .unwrap();
        assert_eq!(second.total(), 1);
        assert_eq!(first.await.unwrap().unwrap().total(), 0);
        assert_eq!(coordinator.fetches(), 2);
    }
}
