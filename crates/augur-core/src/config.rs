//! Consumer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::FailurePolicy;

/// Bounded exponential backoff for the initial broker connection.
///
/// `delay = base_delay * multiplier^(attempt - 1)`. The default is a single
/// attempt: unreachable broker at startup fails fast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

impl ConnectConfig {
    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-indexed).
    ///
    /// Clamped to `[0, MAX_BACKOFF]`: `Duration::from_secs_f64` panics on a
    /// negative or non-finite input, both reachable from a deserialized
    /// config with a pathological `multiplier`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        const MAX_BACKOFF_SECS: f64 = 60.0;

        let base = Duration::from_millis(self.base_delay_ms).as_secs_f64();
        let delay = base * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        if delay.is_finite() {
            Duration::from_secs_f64(delay.clamp(0.0, MAX_BACKOFF_SECS))
        } else {
            Duration::from_secs_f64(MAX_BACKOFF_SECS)
        }
    }
}

/// Everything the consumer session needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Durable queue to consume from.
    pub queue: String,

    /// Maximum unacknowledged deliveries per session. This is the sole
    /// flow-control mechanism against the broker.
    pub prefetch: usize,

    /// Concurrent handler tasks. Effective concurrency is still capped by
    /// `prefetch`.
    pub workers: usize,

    /// What to do with deliveries whose prediction failed.
    pub on_failure: FailurePolicy,

    pub connect: ConnectConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "task_queue".to_string(),
            prefetch: 1,
            workers: 1,
            on_failure: FailurePolicy::DeadLetter,
            connect: ConnectConfig::default(),
        }
    }
}
