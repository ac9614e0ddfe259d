//! Retry policy for external calls.

use library_transcoder_config::RetryConfig;
use std::time::Duration;

/// How often, and how patiently, a failing operation is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Fixed delay before each retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    /// Build from the `[retry]` config section; `max_attempts = 0` means unbounded.
    pub fn from_config(cfg: &RetryConfig) -> Self {
        let backoff = Duration::from_secs(cfg.backoff_secs);
        match cfg.max_attempts {
            0 => Self::unbounded(backoff),
            n => Self::bounded(n, backoff),
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempt < max,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(60))
    }
}
