//! Generic Cell Rate Algorithm over the store facade.
//!
//! State per key is a single theoretical arrival time (TAT), stored as ASCII
//! nanoseconds since the Unix epoch. Admission for cost 1 at time `t`:
//!
//! ```text
//! new_tat = max(tat, t) + T          T = emission interval (1s / rate)
//! limited ⇔ new_tat - t > τ + T      τ = T * burst
//! ```
//!
//! Updates go through compare-and-swap (or SET-if-absent for a fresh cell);
//! a lost race re-reads and retries, which keeps cells linearizable per key.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gateway_kv::{KeyValueStore, KvError};

/// Lost-CAS retry budget before the decision is reported as a store failure.
const MAX_CAS_ATTEMPTS: u32 = 10;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    /// Advertised limit: `burst + 1`.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// How long until a retry could be admitted; set on refusals only.
    pub retry_after: Option<Duration>,
    /// When the cell drains back to empty.
    pub reset_at: SystemTime,
}

pub struct GcraLimiter {
    store: Arc<dyn KeyValueStore>,
    emission_interval: Duration,
    tolerance: Duration,
    limit: u64,
}

impl GcraLimiter {
    /// Build a limiter admitting `requests_per_second` sustained with
    /// `burst_size` extra cells of tolerance.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, requests_per_second: u32, burst_size: u32) -> Self {
        let rate = requests_per_second.max(1);
        let emission_interval = Duration::from_secs(1) / rate;
        Self {
            store,
            emission_interval,
            tolerance: emission_interval * burst_size,
            limit: u64::from(burst_size) + 1,
        }
    }

    /// Check-and-consume one cell for `key`.
    ///
    /// # Errors
    /// Returns [`KvError`] when the store fails or the CAS retry budget is
    /// exhausted under pathological contention.
    pub async fn check(&self, key: &str) -> Result<Decision, KvError> {
        let interval = nanos_i64(self.emission_interval);
        let budget = nanos_i64(self.tolerance) + interval;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (raw, now) = self.store.get_with_time(key).await?;
            let now_ns = unix_nanos(now);

            let tat = raw
                .as_deref()
                .and_then(|b| std::str::from_utf8(b).ok())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(now_ns);

            let new_tat = tat.max(now_ns) + interval;
            let delta = new_tat - now_ns;

            if delta > budget {
                let excess = delta - budget;
                return Ok(Decision {
                    allowed: false,
                    limit: self.limit,
                    remaining: 0,
                    retry_after: Some(Duration::from_nanos(excess.unsigned_abs())),
                    reset_at: now + Duration::from_nanos((tat - now_ns).max(0).unsigned_abs()),
                });
            }

            let new_value = new_tat.to_string();
            let ttl = Duration::from_nanos(delta.unsigned_abs());
            let stored = match raw {
                Some(old) => {
                    self.store
                        .compare_and_swap(key, &old, new_value.as_bytes(), ttl)
                        .await?
                }
                None => {
                    self.store
                        .set_if_not_exists(key, new_value.as_bytes(), ttl)
                        .await?
                }
            };
            if !stored {
                // Lost the race; re-read and retry.
                continue;
            }

            let remaining = u64::try_from((budget - delta) / interval).unwrap_or(0);
            return Ok(Decision {
                allowed: true,
                limit: self.limit,
                remaining,
                retry_after: None,
                reset_at: now + ttl,
            });
        }

        Err(KvError::Backend(format!(
            "rate-limit cell for {key:?} did not settle after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }
}

fn nanos_i64(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

fn unix_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_nanos()).ok())
        .unwrap_or(0)
}
