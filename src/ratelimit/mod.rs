//! Fixed-window rate limiting keyed by (operation class, user).
//!
//! The counter state is the one piece of process-wide mutable state in the
//! engine, so it lives behind [`CounterStore`]: the in-process backend covers
//! a single instance, the Redis backend covers a fleet. Both serialize
//! increments on the same key; undercounting under concurrency is a bug.

pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::RateLimitSettings;
use crate::error::AppError;
use crate::metrics;

pub use redis_store::RedisCounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    Message,
    Upload,
}

impl OpClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpClass::Message => "message",
            OpClass::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the window resets; zero when allowed.
    pub retry_after_secs: u64,
    pub remaining: u32,
}

/// Observation of a bucket after an increment.
#[derive(Debug, Clone, Copy)]
pub struct WindowSlot {
    pub count: u32,
    pub expires_in: Duration,
}

/// Key-value store with atomic increment semantics over expiring windows.
/// Implementations must serialize increments per key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments the counter for `bucket`, creating or resetting it with
    /// count 1 when absent or expired, and reports the post-increment count
    /// plus time remaining in the window.
    async fn incr_window(&self, bucket: &str, window: Duration) -> Result<WindowSlot, AppError>;
}

struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Per-process counter backend.
#[derive(Default)]
pub struct MemoryCounterStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_window(&self, bucket: &str, window: Duration) -> Result<WindowSlot, AppError> {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let entry = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Bucket { count: 0, window_start: now });

        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;

        let expires_in = window.saturating_sub(now.duration_since(entry.window_start));
        Ok(WindowSlot {
            count: entry.count,
            expires_in,
        })
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    fn threshold(&self, op: OpClass) -> u32 {
        match op {
            OpClass::Message => self.settings.message_per_window,
            OpClass::Upload => self.settings.upload_per_window,
        }
    }

    /// Counts the call against the user's window and decides whether it may
    /// proceed. Denials carry the seconds until the window ends.
    pub async fn check_and_consume(
        &self,
        op: OpClass,
        user_id: Uuid,
    ) -> Result<RateLimitDecision, AppError> {
        let bucket = format!("ratelimit:{}:{}", op.as_str(), user_id);
        let slot = self.store.incr_window(&bucket, self.settings.window).await?;

        let threshold = self.threshold(op);
        let allowed = slot.count <= threshold;

        metrics::RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&[op.as_str()])
            .inc();
        if !allowed {
            metrics::RATE_LIMIT_DENIALS_TOTAL
                .with_label_values(&[op.as_str()])
                .inc();
        }

        Ok(RateLimitDecision {
            allowed,
            retry_after_secs: if allowed {
                0
            } else {
                // Round up so a caller who waits the advertised time always
                // lands in a fresh window.
                slot.expires_in.as_secs().max(1)
            },
            remaining: threshold.saturating_sub(slot.count),
        })
    }

    /// Convenience wrapper turning a denial into the typed error.
    pub async fn enforce(&self, op: OpClass, user_id: Uuid) -> Result<(), AppError> {
        let decision = self.check_and_consume(op, user_id).await?;
        if decision.allowed {
            Ok(())
        } else {
            Err(AppError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;

    fn limiter(message_limit: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            RateLimitSettings {
                message_per_window: message_limit,
                upload_per_window: 2,
                window,
            },
        )
    }

    #[tokio::test]
    async fn first_n_allowed_then_denied_with_retry_after() {
        let limiter = limiter(5, Duration::from_secs(60));
        let user = Uuid::new_v4();

        for i in 0..5 {
            let d = limiter.check_and_consume(OpClass::Message, user).await.unwrap();
            assert!(d.allowed, "call {} should be allowed", i + 1);
        }

        let denied = limiter.check_and_consume(OpClass::Message, user).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0);
    }

    #[tokio::test]
    async fn classes_have_independent_buckets() {
        let limiter = limiter(5, Duration::from_secs(60));
        let user = Uuid::new_v4();

        for _ in 0..2 {
            assert!(limiter.check_and_consume(OpClass::Upload, user).await.unwrap().allowed);
        }
        assert!(!limiter.check_and_consume(OpClass::Upload, user).await.unwrap().allowed);
        // Message class is untouched by upload denials.
        assert!(limiter.check_and_consume(OpClass::Message, user).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn users_do_not_share_buckets() {
        let limiter = limiter(1, Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.check_and_consume(OpClass::Message, a).await.unwrap().allowed);
        assert!(!limiter.check_and_consume(OpClass::Message, a).await.unwrap().allowed);
        assert!(limiter.check_and_consume(OpClass::Message, b).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn window_expiry_resets_the_bucket() {
        let limiter = limiter(1, Duration::from_millis(20));
        let user = Uuid::new_v4();

        assert!(limiter.check_and_consume(OpClass::Message, user).await.unwrap().allowed);
        assert!(!limiter.check_and_consume(OpClass::Message, user).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check_and_consume(OpClass::Message, user).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn concurrent_increments_never_undercount() {
        let limiter = Arc::new(limiter(10, Duration::from_secs(60)));
        let user = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check_and_consume(OpClass::Message, user).await.unwrap().allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn enforce_surfaces_typed_error() {
        let limiter = limiter(1, Duration::from_secs(60));
        let user = Uuid::new_v4();

        limiter.enforce(OpClass::Message, user).await.unwrap();
        let err = limiter.enforce(OpClass::Message, user).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after_secs } if retry_after_secs > 0));
    }
}
