// Retry/backoff policy
use crate::domain::Task;
use crate::port::TaskError;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Default base delay of the first retry (1s)
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling for any retry delay (5 minutes)
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Retry decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-publish with `retry_count + 1` after the delay
    Retry { delay: Duration },
    /// Terminal failure
    Failed,
}

/// Exponential backoff policy
///
/// `delay = min(base * 2^retry_count, cap)` with ±10% jitter, clamped to the cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Backoff before retry number `retry_count + 1`, without jitter
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Backoff with ±10% jitter, never above the cap
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        let delay = self.backoff_delay(retry_count);
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Decide what happens to a task whose attempt just failed
    pub fn decide(&self, task: &Task, error: &TaskError) -> RetryDecision {
        if !error.retryable {
            warn!(
                task_id = %task.id,
                error = %error,
                "Permanent task error, not retrying"
            );
            return RetryDecision::Failed;
        }

        if !task.can_retry() {
            warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                "Max retries reached"
            );
            return RetryDecision::Failed;
        }

        let delay = self.jittered_delay(task.retry_count);
        info!(
            task_id = %task.id,
            attempt = task.attempt(),
            max_retries = task.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        RetryDecision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskArgs;
    use proptest::prelude::*;

    fn failing_task(retry_count: u32, max_retries: u32) -> Task {
        let mut task = Task::new_test("default", "flaky", TaskArgs::new());
        task.retry_count = retry_count;
        task.max_retries = max_retries;
        task
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_decide_retry_then_failed() {
        let policy = RetryPolicy::default();
        let err = TaskError::retryable("IOError", "boom");

        match policy.decide(&failing_task(0, 2), &err) {
            RetryDecision::Retry { delay } => {
                assert!(delay >= Duration::from_millis(900));
                assert!(delay <= Duration::from_millis(1100));
            }
            other => panic!("expected retry, got {:?}", other),
        }
        assert_eq!(policy.decide(&failing_task(2, 2), &err), RetryDecision::Failed);
    }

    #[test]
    fn test_permanent_error_fails_immediately() {
        let policy = RetryPolicy::default();
        let err = TaskError::permanent("ValueError", "bad input");
        assert_eq!(policy.decide(&failing_task(0, 5), &err), RetryDecision::Failed);
    }

    #[test]
    fn test_jitter_near_duration_max_stays_capped() {
        let policy = RetryPolicy::new(Duration::MAX, Duration::MAX);
        assert!(policy.jittered_delay(3) <= Duration::MAX);
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::default();
        let err = TaskError::retryable("E", "x");
        assert_eq!(policy.decide(&failing_task(0, 0), &err), RetryDecision::Failed);
    }

    proptest! {
        #[test]
        fn prop_backoff_monotonic_and_capped(
            base_ms in 1u64..10_000,
            cap_ms in 1u64..1_000_000,
            n in 0u32..64,
        ) {
            let policy = RetryPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
            prop_assert!(policy.backoff_delay(n) <= policy.backoff_delay(n + 1));
            prop_assert!(policy.backoff_delay(n) <= policy.cap());
            prop_assert!(policy.jittered_delay(n) <= policy.cap());
        }
    }
}
