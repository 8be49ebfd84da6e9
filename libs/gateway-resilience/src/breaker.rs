//! Circuit breaker state machine.
//!
//! One breaker instance guards one named downstream service. State lives
//! behind a single short mutex; the guarded call itself runs outside the
//! critical section. A monotonic generation counter is captured when a call
//! is admitted and compared when it completes, so a call that was in flight
//! across a state transition cannot account against the new generation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Breaker tuning. Zero values fall back to defaults where noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Concurrent probes admitted in half-open. `0` means `1`.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Cyclic failure-counter clear period while closed. `0s` disables it.
    #[serde(default, with = "gateway_util::humantime_serde")]
    pub interval: Duration,

    /// How long the breaker stays open before probing. `0s` means 60s.
    #[serde(default = "default_timeout", with = "gateway_util::humantime_serde")]
    pub timeout: Duration,

    /// Consecutive failures that trip the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_max_requests() -> u32 {
    5
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_failure_threshold() -> u32 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            interval: Duration::from_secs(60),
            timeout: default_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure produced by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Fail-fast sentinel: the breaker is open.
    #[error("circuit '{name}' is open")]
    Open { name: Arc<str> },

    /// Half-open probe budget exhausted.
    #[error("circuit '{name}' rejected the call: too many half-open probes")]
    TooManyRequests { name: Arc<str> },

    /// The guarded call itself failed.
    #[error(transparent)]
    Inner(E),
}

struct Inner {
    state: BreakerState,
    generation: u64,
    consecutive_failures: u32,
    half_open_inflight: u32,
    half_open_successes: u32,
    /// When the open state expires and a probe may go through.
    open_expiry: Option<Instant>,
    /// Next cyclic clear while closed.
    interval_expiry: Option<Instant>,
}

/// Circuit breaker guarding one named downstream.
pub struct CircuitBreaker {
    name: Arc<str>,
    enabled: bool,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &str, cfg: &CircuitBreakerConfig) -> Self {
        let max_requests = if cfg.max_requests == 0 {
            1
        } else {
            cfg.max_requests
        };
        let timeout = if cfg.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            cfg.timeout
        };
        let interval_expiry = if cfg.interval.is_zero() {
            None
        } else {
            Some(Instant::now() + cfg.interval)
        };

        Self {
            name: Arc::from(name),
            enabled: cfg.enabled,
            max_requests,
            interval: cfg.interval,
            timeout,
            failure_threshold: cfg.failure_threshold,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                consecutive_failures: 0,
                half_open_inflight: 0,
                half_open_successes: 0,
                open_expiry: None,
                interval_expiry,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, after applying time-based transitions.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner, Instant::now());
        inner.state
    }

    /// Run `f` under the breaker.
    ///
    /// # Errors
    /// Returns [`BreakerError::Open`] / [`BreakerError::TooManyRequests`]
    /// without invoking `f`, or [`BreakerError::Inner`] with `f`'s own error.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return f().await.map_err(BreakerError::Inner);
        }

        let generation = self.admit()?;
        let result = f().await;
        self.settle(generation, result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// Admission check; returns the generation the call is accounted under.
    fn admit<E>(&self) -> Result<u64, BreakerError<E>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);

        match inner.state {
            BreakerState::Closed => Ok(inner.generation),
            BreakerState::Open => Err(BreakerError::Open {
                name: self.name.clone(),
            }),
            BreakerState::HalfOpen => {
                if inner.half_open_inflight >= self.max_requests {
                    return Err(BreakerError::TooManyRequests {
                        name: self.name.clone(),
                    });
                }
                inner.half_open_inflight += 1;
                Ok(inner.generation)
            }
        }
    }

    /// Account a completed call. A stale generation is ignored entirely.
    fn settle(&self, generation: u64, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.advance(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        match (inner.state, success) {
            (BreakerState::Closed, true) => {
                inner.consecutive_failures = 0;
            }
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.max_requests {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.transition(&mut inner, BreakerState::Open, now);
            }
            // A call admitted under Closed can settle after the breaker
            // opened; the generation check above already filtered it out.
            (BreakerState::Open, _) => {}
        }
    }

    /// Apply transitions that are due purely to the passage of time.
    fn advance(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if let Some(expiry) = inner.interval_expiry
                    && now >= expiry
                {
                    // Cyclic clear: new generation, counters reset.
                    inner.generation += 1;
                    inner.consecutive_failures = 0;
                    inner.interval_expiry = Some(now + self.interval);
                }
            }
            BreakerState::Open => {
                if let Some(expiry) = inner.open_expiry
                    && now >= expiry
                {
                    self.transition(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        inner.half_open_inflight = 0;
        inner.half_open_successes = 0;
        inner.open_expiry = None;
        inner.interval_expiry = None;

        match to {
            BreakerState::Open => inner.open_expiry = Some(now + self.timeout),
            BreakerState::Closed if !self.interval.is_zero() => {
                inner.interval_expiry = Some(now + self.interval);
            }
            _ => {}
        }

        tracing::warn!(
            breaker = %self.name,
            from = ?from,
            to = ?to,
            generation = inner.generation,
            "circuit breaker state change"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32, timeout: Duration, max_requests: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            max_requests,
            interval: Duration::ZERO,
            timeout,
            failure_threshold: threshold,
        }
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.execute(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let b = CircuitBreaker::new("devices", &cfg(3, Duration::from_secs(60), 1));

        for _ in 0..3 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(b.state(), BreakerState::Open);

        // Fail fast without touching the downstream.
        let called = std::sync::atomic::AtomicBool::new(false);
        let res: Result<(), _> = b
            .execute(|| {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<(), &'static str>(()) }
            })
            .await;
        assert!(matches!(res, Err(BreakerError::Open { .. })));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let b = CircuitBreaker::new("devices", &cfg(3, Duration::from_secs(60), 1));

        for _ in 0..2 {
            let _ = fail(&b).await;
        }
        succeed(&b).await.unwrap();
        for _ in 0..2 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open_probes() {
        let b = CircuitBreaker::new("devices", &cfg(1, Duration::from_millis(20), 2));

        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let b = CircuitBreaker::new("devices", &cfg(1, Duration::from_millis(20), 2));

        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_caps_concurrent_probes() {
        let b = std::sync::Arc::new(CircuitBreaker::new(
            "devices",
            &cfg(1, Duration::from_millis(10), 1),
        ));

        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.execute(|| async {
                    rx.await.ok();
                    Ok::<(), &'static str>(())
                })
                .await
            })
        };
        // Let the probe occupy the single permit.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let res = succeed(&b).await;
        assert!(matches!(res, Err(BreakerError::TooManyRequests { .. })));

        tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn stale_generation_does_not_account() {
        let b = std::sync::Arc::new(CircuitBreaker::new(
            "devices",
            &cfg(2, Duration::from_secs(60), 1),
        ));

        // Slow call admitted under the closed generation.
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let slow = {
            let b = b.clone();
            tokio::spawn(async move {
                b.execute(|| async {
                    rx.await.ok();
                    Err::<(), _>("late failure")
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Trip the breaker while the slow call is in flight.
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        // The late completion must not disturb the new generation.
        tx.send(()).unwrap();
        let _ = slow.await.unwrap();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn disabled_breaker_is_identity() {
        let mut config = cfg(1, Duration::from_secs(60), 1);
        config.enabled = false;
        let b = CircuitBreaker::new("devices", &config);

        for _ in 0..10 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Closed);
        succeed(&b).await.unwrap();
    }

    #[tokio::test]
    async fn interval_tick_clears_the_streak() {
        let config = CircuitBreakerConfig {
            enabled: true,
            max_requests: 1,
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(60),
            failure_threshold: 3,
        };
        let b = CircuitBreaker::new("devices", &config);

        let _ = fail(&b).await;
        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The tick reset the counter: one more failure is not enough to trip.
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
