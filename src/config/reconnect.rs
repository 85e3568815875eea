use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Session re-establishment policy.
///
/// The inherited behavior is to retry forever (`max_retries = 0`); a bounded
/// policy makes the engine give up and terminate the session gate after the
/// configured number of failed connect attempts.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive failed connect attempts
    /// (0 means unlimited retries)
    #[serde(default)]
    pub max_retries: usize,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl ReconnectPolicy {
    /// Exponential backoff with ±25% jitter, capped at `max_delay_ms`.
    /// `attempt` counts from 1.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as u32;
        let raw = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.max_delay_ms)
            .max(1);
        let jitter_span = raw / 4;
        let jittered = if jitter_span == 0 {
            raw
        } else {
            let mut rng = rand::thread_rng();
            raw - jitter_span + rng.gen_range(0..=jitter_span * 2)
        };
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    /// Whether the policy is exhausted after `attempt` consecutive failures.
    pub fn is_exhausted(&self, attempt: usize) -> bool {
        self.max_retries != 0 && attempt >= self.max_retries
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    10_000
}
