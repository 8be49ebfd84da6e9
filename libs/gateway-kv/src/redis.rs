//! Redis store backend.
//!
//! SET-if-absent maps to `SET NX PX`; compare-and-swap has no single Redis
//! command and runs as a Lua script, which Redis executes atomically. The
//! health probe exercises both primitives so a misconfigured backend (e.g.
//! scripting disabled by an ACL) is rejected at boot rather than discovered
//! under traffic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::{Client, Script};

use crate::{KeyValueStore, KvError, KvResult};

const CAS_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
end
return 0
";

/// Shared [`KeyValueStore`] backend over a Redis deployment.
pub struct RedisStore {
    manager: ConnectionManager,
    cas: Script,
}

impl RedisStore {
    /// Connect to the given Redis URL (`redis://host:port/db`).
    ///
    /// # Errors
    /// Returns [`KvError::Backend`] when the URL is invalid or the initial
    /// connection cannot be established.
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = Client::open(url).map_err(to_kv_err)?;
        let manager = ConnectionManager::new(client).await.map_err(to_kv_err)?;
        Ok(Self {
            manager,
            cas: Script::new(CAS_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn to_kv_err(err: redis::RedisError) -> KvError {
    KvError::Backend(err.to_string())
}

/// TTLs are rounded up to whole milliseconds; Redis rejects `PX 0`.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let mut conn = self.conn();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_kv_err)
    }

    async fn get_with_time(&self, key: &str) -> KvResult<(Option<Vec<u8>>, SystemTime)> {
        let mut conn = self.conn();
        // Single round trip; TIME is the Redis server clock, shared by all
        // replicas that talk to this deployment.
        let (value, (secs, micros)): (Option<Vec<u8>>, (u64, u64)) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("TIME")
            .query_async(&mut conn)
            .await
            .map_err(to_kv_err)?;

        let now = UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros);
        Ok((value, now))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let () = cmd.query_async(&mut conn).await.map_err(to_kv_err)?;
        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(to_kv_err)?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        ttl: Duration,
    ) -> KvResult<bool> {
        let mut conn = self.conn();
        let swapped: i64 = self
            .cas
            .key(key)
            .arg(expected)
            .arg(new)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(to_kv_err)?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_kv_err)?;
        Ok(removed > 0)
    }

    async fn scan(&self, prefix: &str, limit: usize) -> KvResult<Vec<String>> {
        use redis::AsyncCommands;

        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut iter: redis::AsyncIter<'_, String> =
            conn.scan_match(&pattern).await.map_err(to_kv_err)?;

        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
            if keys.len() >= limit {
                break;
            }
        }
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let mut conn = self.conn();
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(to_kv_err)?;
        // -2 missing key, -1 no expiry.
        if millis < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(millis.unsigned_abs())))
    }

    async fn ping(&self) -> KvResult<()> {
        let mut conn = self.conn();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(to_kv_err)?;
        if pong != "PONG" {
            return Err(KvError::Backend(format!("unexpected PING reply: {pong}")));
        }

        // Verify the atomic primitives before declaring the store usable.
        let probe: i64 = Script::new("return 1")
            .invoke_async(&mut conn)
            .await
            .map_err(|_| KvError::UnsupportedPrimitive("compare-and-swap (Lua scripting)"))?;
        if probe != 1 {
            return Err(KvError::UnsupportedPrimitive("compare-and-swap"));
        }
        Ok(())
    }
}
