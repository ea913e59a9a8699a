//! Expiry Sweep Task
//!
//! Background task that periodically removes entries older than the stale
//! window from both cache tiers, along with profiles and token mappings past
//! their TTL.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::access::DataAccess;

/// Spawns a background task that periodically purges expired state.
///
/// The task runs in an infinite loop, sleeping for the specified interval
/// between sweeps. Each sweep takes the cache store's write lock once.
///
/// # Arguments
/// * `access` - Shared data-access runtime
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_cleanup_task(access: DataAccess, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let report = access.purge_expired().await;
            if report.entries > 0 || report.identities > 0 {
                info!(
                    "Expiry sweep: removed {} expired entries and {} expired identities",
                    report.entries, report.identities
                );
            } else {
                debug!("Expiry sweep: nothing expired");
            }
        }
    })
}
