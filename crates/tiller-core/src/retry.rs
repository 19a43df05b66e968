// Retry policy with exponential backoff and optional jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration for a task
///
/// Delay for attempt `n` (0-indexed) is
/// `min(initial_delay * backoff_multiplier^n, max_delay)`, optionally
/// multiplied by a uniform jitter factor in `[0.75, 1.25]` to avoid
/// thundering herds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_initial_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Retry quickly and often: 5 retries from 0.5s, capped at 30s
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: 0.5,
            max_delay: 30.0,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retry slowly: 3 retries from 2s with a x3 multiplier, capped at 120s
    pub fn conservative() -> Self {
        Self {
            max_retries: 3,
            initial_delay: 2.0,
            max_delay: 120.0,
            backoff_multiplier: 3.0,
            jitter: true,
        }
    }

    /// Delay before the retry that follows attempt `attempt` (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt >= self.max_retries {
            return Duration::ZERO;
        }

        let mut delay = (self.initial_delay * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_delay);

        if self.jitter {
            delay *= rand::thread_rng().gen_range(0.75..=1.25);
        }

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Whether attempt `attempt` (0-indexed) may be followed by another
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
