use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

/// Exponential backoff shared by the tool router and the model communicator.
///
/// The delay after failed attempt `n` (zero-based) is
/// `backoff_base_ms * 2^n`, capped at `backoff_max_ms` when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts made before giving up. Callers that carry their own attempt
    /// budget (such as [`crate::ToolRequest::retry_count`]) ignore this.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on a single delay in milliseconds.
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting. Intended for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: Some(0),
        }
    }

    /// Delay to wait after the zero-based failed `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let mut ms = self.backoff_base_ms.saturating_mul(factor);
        if let Some(max) = self.backoff_max_ms {
            ms = ms.min(max);
        }
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 1000,
            backoff_max_ms: Some(30_000),
        };
        assert_eq!(policy.delay(4), Duration::from_secs(16));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        // saturates rather than overflowing
        assert_eq!(policy.delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_immediate_policy() {
        let policy = RetryPolicy::immediate(5);
        assert_eq!(policy.delay(3), Duration::ZERO);
    }
}
