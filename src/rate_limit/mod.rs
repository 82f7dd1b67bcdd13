//! Rate limiting.
//!
//! Two layers: hourly counters per (purpose, identifier) for one-time code
//! requests, and per-IP token buckets in front of the public auth endpoints.

mod counters;
mod ip;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub use counters::{CounterError, CounterStore, MemoryCounters, RedisCounters};
pub use ip::{IpLimiter, IpRateLimits, rate_limit_login, rate_limit_otp, rate_limit_signup};
pub(crate) use ip::request_path;

/// Windowed counters with a fail-open policy.
///
/// When the backing store errors or does not answer within `timeout`, the
/// request is allowed and a warning is logged.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Count one hit for `identifier` in `namespace` and report whether the
    /// post-increment count is within `limit`.
    pub async fn check_and_increment(
        &self,
        namespace: &str,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> bool {
        let key = format!("{}:{}", namespace, identifier);
        match tokio::time::timeout(self.timeout, self.store.increment(&key, window)).await {
            Ok(Ok(count)) => count <= u64::from(limit),
            Ok(Err(e)) => {
                warn!(namespace, error = %e, "Rate limit backend failed, allowing request");
                true
            }
            Err(_) => {
                warn!(
                    namespace,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Rate limit backend timed out, allowing request"
                );
                true
            }
        }
    }
}
