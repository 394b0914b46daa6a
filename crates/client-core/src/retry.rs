use std::time::Duration;

/// Exponential backoff for retryable fetch failures (history, presence).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before retry number `attempt` (zero-based), doubling per attempt
    /// and honoring a server retry-after hint when it is larger.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let shift = attempt.min(20);
        let scaled = self.base_delay_ms.saturating_mul(1_u64 << shift);
        let hinted = retry_after_hint_ms.unwrap_or(0);
        Duration::from_millis(scaled.max(hinted).min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Interactive refetch: start fast, cap well below the presence poll
        // interval so a flaky fetch recovers within one poll cycle.
        Self::new(400, 15_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_delay() {
        let policy = RetryPolicy::new(200, 10_000);
        assert_eq!(policy.delay_for_attempt(0, None), Duration::from_millis(200));
    }

    #[test]
    fn delay_doubles_until_the_cap() {
        let policy = RetryPolicy::new(400, 3_000);
        assert_eq!(policy.delay_for_attempt(1, None), Duration::from_millis(800));
        assert_eq!(
            policy.delay_for_attempt(2, None),
            Duration::from_millis(1_600)
        );
        assert_eq!(
            policy.delay_for_attempt(10, None),
            Duration::from_millis(3_000)
        );
    }

    #[test]
    fn larger_retry_after_hint_wins() {
        let policy = RetryPolicy::new(400, 20_000);
        assert_eq!(
            policy.delay_for_attempt(0, Some(5_000)),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::new(400, 15_000);
        assert_eq!(
            policy.delay_for_attempt(u32::MAX, None),
            Duration::from_millis(15_000)
        );
    }
}
