use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Base delay in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub multiplier: f64,

    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl Backoff {
    /// No waiting between attempts
    pub fn none() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        // spread retries from concurrent submitters
        let jitter = if self.jitter_factor > 0.0 {
            (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor
        } else {
            0.0
        };
        let jittered = (delay_ms * (1.0 + jitter)).max(0.0) as u64;

        Duration::from_millis(jittered)
    }
}

/// How tiers are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FanOut {
    /// One tier at a time, next tier only after the previous exhausted its retries
    #[default]
    Sequential,
    /// All tiers at once; first acceptance wins
    Parallel,
    /// Tier `i` starts `i * delay_ms` after the first
    Staggered { delay_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPolicy {
    /// Attempts per tier, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Window in which re-submitting an accepted envelope is answered locally
    pub dedupe_window: Duration,
    pub fan_out: FanOut,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            dedupe_window: Duration::from_secs(60),
            fan_out: FanOut::Sequential,
        }
    }
}

impl BroadcastPolicy {
    /// Create a policy for aggressive retries
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff {
                base_delay_ms: 50,
                max_delay_ms: 2000,
                multiplier: 1.5,
                jitter_factor: 0.15,
            },
            fan_out: FanOut::Parallel,
            ..Self::default()
        }
    }

    /// Create a policy for conservative retries
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff {
                base_delay_ms: 200,
                max_delay_ms: 10000,
                multiplier: 3.0,
                jitter_factor: 0.05,
            },
            ..Self::default()
        }
    }

    /// Policy with at least one attempt
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self
    }
}
