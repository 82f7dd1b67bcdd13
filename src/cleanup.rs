//! Scheduled purging of in-process rate limit state.
//!
//! Durable records (refresh tokens, one-time codes) are an audit trail and are
//! never deleted here.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::rate_limit::{CounterStore, IpRateLimits};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Run all cleanup tasks once.
pub fn run_cleanup(counters: &dyn CounterStore, limits: &IpRateLimits) {
    let purged = counters.purge_expired();
    if purged > 0 {
        info!(count = purged, "Purged expired rate limit windows");
    }
    limits.purge_stale();
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    counters: Arc<dyn CounterStore>,
    limits: Arc<IpRateLimits>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(counters.as_ref(), &limits);
        }
    })
}
