//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay schedule for retry loops.
///
/// Attempt `n` (1-based) waits `base_delay * multiplier^(n-1)`, capped at
/// `max_delay`, then spread by the jitter factor: a delay `d` with jitter `j`
/// lands uniformly in `[d * (1 - j), d * (1 + j)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay", with = "gateway_util::humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomization factor in `[0, 1]`. Values outside the range are clamped.
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default = "default_max_delay", with = "gateway_util::humantime_serde")]
    pub max_delay: Duration,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_jitter() -> f64 {
    0.3
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_delay: default_max_delay(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent.cast_signed());
        let capped = scaled.min(self.max_delay.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let spread = if jitter == 0.0 {
            capped
        } else {
            let r: f64 = rand::rng().random();
            capped * (1.0 - jitter + 2.0 * jitter * r)
        };

        Duration::from_secs_f64(spread.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}
