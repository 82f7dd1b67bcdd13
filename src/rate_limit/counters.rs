//! Windowed counter backends.
//!
//! A counter is created on its first increment and expires `window` after
//! that first hit. Increments never extend the window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;

use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("counter backend error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, starting a window of `window` if the key is
    /// absent. Returns the post-increment count.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, CounterError>;

    /// Drop windows that have ended. Returns how many were removed. Backends
    /// with native key expiry have nothing to do.
    fn purge_expired(&self) -> usize {
        0
    }
}

/// INCR, and set the TTL only when the key was just created.
const INCR_WITH_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counters shared by every process talking to the same Redis.
#[derive(Clone)]
pub struct RedisCounters {
    connection: ConnectionManager,
    script: Arc<redis::Script>,
}

impl RedisCounters {
    pub async fn connect(url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            script: Arc::new(redis::Script::new(INCR_WITH_WINDOW)),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounters {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, CounterError> {
        let mut connection = self.connection.clone();
        let count: u64 = self
            .script
            .key(key)
            .arg(window.as_secs().max(1))
            .invoke_async(&mut connection)
            .await?;
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: i64,
}

/// In-process counters for single-instance deployments and tests.
pub struct MemoryCounters {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounters {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, CounterError> {
        let now = self.clock.now();
        let expires_at = now + window.as_secs() as i64;

        // The entry guard holds the shard lock, so the check and the increment are atomic.
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at,
        });
        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at,
            };
        }
        entry.count += 1;
        Ok(entry.count)
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires_at > now);
        before.saturating_sub(self.windows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_counts_within_window() {
        let clock = Arc::new(ManualClock::new(0));
        let counters = MemoryCounters::new(clock.clone());

        assert_eq!(counters.increment("a", HOUR).await.unwrap(), 1);
        assert_eq!(counters.increment("a", HOUR).await.unwrap(), 2);
        assert_eq!(counters.increment("b", HOUR).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_window_starts_at_first_hit() {
        let clock = Arc::new(ManualClock::new(0));
        let counters = MemoryCounters::new(clock.clone());

        counters.increment("a", HOUR).await.unwrap();
        clock.advance(Duration::from_secs(3599));
        assert_eq!(counters.increment("a", HOUR).await.unwrap(), 2);

        clock.advance(Duration::from_secs(1));
        assert_eq!(counters.increment("a", HOUR).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let counters = MemoryCounters::new(clock.clone());

        counters.increment("short", Duration::from_secs(10)).await.unwrap();
        counters.increment("long", HOUR).await.unwrap();
        clock.advance(Duration::from_secs(10));

        assert_eq!(counters.purge_expired(), 1);
        assert_eq!(counters.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let clock = Arc::new(ManualClock::new(0));
        let counters = Arc::new(MemoryCounters::new(clock));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let counters = counters.clone();
            handles.push(tokio::spawn(async move {
                counters.increment("shared", HOUR).await.unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
    }
}
