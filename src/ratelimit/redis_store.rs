//! Redis-backed counter store for multi-instance deployments.
//!
//! INCR is atomic on the server side, so concurrent instances share one
//! window without coordination. The key's TTL doubles as the window clock.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CounterStore, WindowSlot};
use crate::error::AppError;

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Counter(format!("redis open: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Counter(format!("redis connect: {e}")))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_window(&self, bucket: &str, window: Duration) -> Result<WindowSlot, AppError> {
        let mut conn = self.conn.clone();
        let window_secs = window.as_secs().max(1) as i64;

        let count: i64 = conn
            .incr(bucket, 1i64)
            .await
            .map_err(|e| AppError::Counter(format!("incr: {e}")))?;

        if count == 1 {
            let _: bool = conn
                .expire(bucket, window_secs)
                .await
                .map_err(|e| AppError::Counter(format!("expire: {e}")))?;
        }

        let ttl: i64 = conn
            .ttl(bucket)
            .await
            .map_err(|e| AppError::Counter(format!("ttl: {e}")))?;
        // TTL of -1 means a crash left the key without expiry; re-arm it so
        // the bucket cannot deny forever.
        let expires_in = if ttl > 0 {
            Duration::from_secs(ttl as u64)
        } else {
            let _: bool = conn
                .expire(bucket, window_secs)
                .await
                .map_err(|e| AppError::Counter(format!("expire: {e}")))?;
            window
        };

        Ok(WindowSlot {
            count: count.clamp(0, u32::MAX as i64) as u32,
            expires_in,
        })
    }
}
