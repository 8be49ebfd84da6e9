#![forbid(unsafe_code)]

//! Key-value store facade for the gateway's distributed coordination.
//!
//! The idempotency engine and the rate limiter share a small store contract:
//! plain reads, TTL-bounded writes, and two atomic primitives — SET-if-absent
//! and compare-and-swap. Both primitives are load-bearing: a backend that
//! cannot provide them invalidates the single-execution guarantee, so such a
//! backend must fail [`KeyValueStore::ping`] and the process must not boot.
//!
//! Two backends ship with the gateway: [`memory::MemoryStore`] for tests and
//! single-replica deployments, and [`redis::RedisStore`] for shared state
//! across replicas.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

/// Store-level failure.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store does not support atomic {0}")]
    UnsupportedPrimitive(&'static str),
}

/// Result alias for store operations.
pub type KvResult<T> = Result<T, KvError>;

/// The store contract the gateway core consumes.
///
/// Values are opaque bytes. TTLs are mandatory where the caller supplies one;
/// a backend must round TTLs up, never down, so a key cannot outlive its
/// intended lifetime by truncation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Read a value together with the store's own clock.
    ///
    /// Rate-limit arithmetic uses the store clock so that all replicas agree
    /// on "now" regardless of local clock skew.
    async fn get_with_time(&self, key: &str) -> KvResult<(Option<Vec<u8>>, SystemTime)>;

    /// Unconditional write, with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()>;

    /// Atomic SET-if-absent with TTL. Returns `true` when the key was created.
    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool>;

    /// Atomic compare-and-swap with TTL. Returns `true` when the stored value
    /// equalled `expected` and was replaced by `new`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Duration,
    ) -> KvResult<bool>;

    /// Delete a key. Returns `true` when the key existed.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// List up to `limit` keys with the given prefix.
    async fn scan(&self, prefix: &str, limit: usize) -> KvResult<Vec<String>>;

    /// Remaining lifetime of a key, when it has one.
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    /// Health probe. Must verify that the atomic primitives are available,
    /// not only that the backend answers.
    async fn ping(&self) -> KvResult<()>;
}

/// A store view that prepends a fixed prefix to every key.
///
/// Each consumer (idempotency cache, rate limiter) owns one scope, so key
/// layouts cannot collide.
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// The scope prefix, as stored.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl KeyValueStore for ScopedStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.inner.get(&self.scoped(key)).await
    }

    async fn get_with_time(&self, key: &str) -> KvResult<(Option<Vec<u8>>, SystemTime)> {
        self.inner.get_with_time(&self.scoped(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        self.inner.set(&self.scoped(key), value, ttl).await
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool> {
        self.inner
            .set_if_not_exists(&self.scoped(key), value, ttl)
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Duration,
    ) -> KvResult<bool> {
        self.inner
            .compare_and_swap(&self.scoped(key), expected, new, ttl)
            .await
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        self.inner.delete(&self.scoped(key)).await
    }

    async fn scan(&self, prefix: &str, limit: usize) -> KvResult<Vec<String>> {
        let full = self.scoped(prefix);
        let keys = self.inner.scan(&full, limit).await?;
        // Callers reason in scope-relative keys.
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_owned))
            .collect())
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        self.inner.ttl(&self.scoped(key)).await
    }

    async fn ping(&self) -> KvResult<()> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn scoped_store_prefixes_keys() {
        let raw = Arc::new(MemoryStore::new());
        let scoped = ScopedStore::new(raw.clone(), "ratelimit:");

        scoped.set("ip:1.2.3.4", b"7", None).await.unwrap();
        assert_eq!(
            raw.get("ratelimit:ip:1.2.3.4").await.unwrap(),
            Some(b"7".to_vec())
        );

        let keys = scoped.scan("ip:", 10).await.unwrap();
        assert_eq!(keys, vec!["ip:1.2.3.4".to_owned()]);
    }
}
