use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::types::WaypointError;

type RetryPredicate = Arc<dyn Fn(&WaypointError) -> bool + Send + Sync>;

/// Retry settings for a single agent run.
///
/// `max_attempts` counts every invocation, the first one included.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
            retryable: Arc::new(|e: &WaypointError| e.classify().retryable),
        }
    }

    /// Millisecond delays for pipeline-testing runs.
    pub fn accelerated(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::from_millis(10), Duration::from_millis(100))
            .with_jitter(false)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WaypointError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, error: &WaypointError) -> bool {
        (self.retryable)(error)
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    ///
    /// - rate limits: 15x the base delay plus 5x per attempt, capped at 4x max_delay
    /// - everything else: base * 2^(attempt-1) plus up to one base of jitter, capped at max_delay
    pub fn delay_for(&self, attempt: u32, error: &WaypointError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        if matches!(error, WaypointError::RateLimit(_)) {
            let delay = self.base_delay * (15 + 5 * exponent);
            return delay.min(self.max_delay * 4);
        }

        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);
        if self.jitter {
            let factor: f64 = rand::random::<f64>();
            delay += self.base_delay.mul_f64(factor);
        }
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_three_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[test]
    fn test_exponential_delay_without_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30))
            .with_jitter(false);
        let err = WaypointError::Network("reset".into());
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(30)); // capped
    }

    #[test]
    fn test_jitter_stays_within_one_base() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        let err = WaypointError::Timeout("slow".into());
        let d = policy.delay_for(2, &err);
        assert!(d >= Duration::from_secs(2) && d < Duration::from_secs(3));
    }

    #[test]
    fn test_rate_limit_uses_longer_schedule() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30))
            .with_jitter(false);
        let err = WaypointError::RateLimit("429".into());
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(40));
        assert_eq!(policy.delay_for(12, &err), Duration::from_secs(120)); // capped
    }

    #[test]
    fn test_custom_predicate() {
        let policy = RetryPolicy::default().with_predicate(|_| false);
        assert!(!policy.is_retryable(&WaypointError::Network("down".into())));
        assert!(RetryPolicy::default().is_retryable(&WaypointError::Network("down".into())));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
    }
}
