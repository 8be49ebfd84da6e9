//! Cache and lock protocol over the shared store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gateway_kv::{KeyValueStore, KvError, ScopedStore};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::IdempotencyConfig;

const STORE_SCOPE: &str = "idempotency:";
const LOCK_SUFFIX: &str = ":lock";
const LOCK_VALUE: &[u8] = b"processing";

/// A captured 2xx response, replayable until its TTL expires.
///
/// Headers keep the first value per name, in original order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

pub struct IdempotencyEngine {
    store: ScopedStore,
    cache_ttl: Duration,
    lock_ttl: Duration,
}

impl IdempotencyEngine {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, cfg: &IdempotencyConfig) -> Self {
        Self {
            store: ScopedStore::new(store, STORE_SCOPE),
            cache_ttl: cfg.cache_ttl,
            lock_ttl: cfg.lock_ttl,
        }
    }

    /// Look up a previously cached response.
    ///
    /// # Errors
    /// Propagates store failures; a corrupt payload reads as a miss.
    pub async fn lookup(&self, storage_key: &str) -> Result<Option<CachedResponse>, KvError> {
        let Some(raw) = self.store.get(storage_key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(cached) => Ok(Some(cached)),
            Err(err) => {
                warn!(%err, storage_key, "discarding undecodable idempotency payload");
                Ok(None)
            }
        }
    }

    /// Acquire the in-progress lock. `false` means another replica holds it.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn try_lock(&self, storage_key: &str) -> Result<bool, KvError> {
        self.store
            .set_if_not_exists(&format!("{storage_key}{LOCK_SUFFIX}"), LOCK_VALUE, self.lock_ttl)
            .await
    }

    /// Release the lock. Best-effort: the TTL bounds orphaned locks, so a
    /// failed release only costs latency for the next caller.
    pub async fn unlock(&self, storage_key: &str) {
        if let Err(err) = self
            .store
            .delete(&format!("{storage_key}{LOCK_SUFFIX}"))
            .await
        {
            warn!(%err, storage_key, "failed to release idempotency lock");
        }
    }

    /// Persist a captured 2xx response.
    ///
    /// # Errors
    /// Propagates store and serialization failures.
    pub async fn persist(
        &self,
        storage_key: &str,
        cached: &CachedResponse,
    ) -> Result<(), KvError> {
        let payload =
            serde_json::to_vec(cached).map_err(|err| KvError::Backend(err.to_string()))?;
        self.store
            .set(storage_key, &payload, Some(self.cache_ttl))
            .await
    }
}
