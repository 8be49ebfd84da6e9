//! In-memory store backend.
//!
//! Entry-level locking via the DashMap shard guards makes SET-if-absent and
//! compare-and-swap atomic per key. Expiry is lazy: an expired entry is
//! treated as absent and removed on the next touch.

use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{KeyValueStore, KvResult};

#[derive(Clone)]
struct Cell {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Cell {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// Process-local [`KeyValueStore`] backend.
#[derive(Default)]
pub struct MemoryStore {
    cells: DashMap<String, Cell>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries. Test helper, also used by the readiness probe.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.iter().filter(|e| e.value().live()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        match self.cells.entry(key.to_owned()) {
            Entry::Occupied(e) if e.get().live() => Ok(Some(e.get().value.clone())),
            Entry::Occupied(e) => {
                e.remove();
                Ok(None)
            }
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn get_with_time(&self, key: &str) -> KvResult<(Option<Vec<u8>>, SystemTime)> {
        let value = self.get(key).await?;
        Ok((value, SystemTime::now()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        self.cells.insert(
            key.to_owned(),
            Cell {
                value: value.to_vec(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool> {
        match self.cells.entry(key.to_owned()) {
            Entry::Occupied(mut e) => {
                if e.get().live() {
                    return Ok(false);
                }
                e.insert(Cell {
                    value: value.to_vec(),
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(true)
            }
            Entry::Vacant(e) => {
                e.insert(Cell {
                    value: value.to_vec(),
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Duration,
    ) -> KvResult<bool> {
        match self.cells.entry(key.to_owned()) {
            Entry::Occupied(mut e) if e.get().live() && e.get().value == expected => {
                e.insert(Cell {
                    value: new.to_vec(),
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        match self.cells.remove(key) {
            Some((_, cell)) => Ok(cell.live()),
            None => Ok(false),
        }
    }

    async fn scan(&self, prefix: &str, limit: usize) -> KvResult<Vec<String>> {
        Ok(self
            .cells
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().live())
            .map(|e| e.key().clone())
            .take(limit)
            .collect())
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        Ok(self.cells.get(key).and_then(|e| {
            e.value()
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()))
        }))
    }

    async fn ping(&self) -> KvResult<()> {
        Ok(())
    }
}
