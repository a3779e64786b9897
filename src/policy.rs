//! Retry configuration and backoff computation.

use http::StatusCode;
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::{Error, Result};

/// Controls how a logical request is retried.
///
/// # Examples
///
/// ```
/// use steadfast::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(5)
///     .with_base_delay(Duration::from_millis(200))
///     .with_max_jitter(Duration::ZERO);
///
/// assert_eq!(policy.base_backoff(1), Duration::from_millis(200));
/// assert_eq!(policy.base_backoff(3), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt. Total attempts never exceed `max_retries + 1`.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each subsequent one.
    pub base_delay: Duration,

    /// Upper (exclusive) bound of the uniform jitter added to every backoff.
    pub max_jitter: Duration,

    /// Statuses that are worth another attempt. `429` in this set means "rate limited".
    pub retryable_statuses: BTreeSet<u16>,

    /// Timeout for a single attempt.
    pub request_timeout: Duration,

    /// Wall-clock budget for all attempts of one logical request, including
    /// backoff sleeps and credential refresh.
    pub resource_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
            retryable_statuses: default_retryable_statuses(),
            request_timeout: Duration::from_secs(30),
            resource_timeout: Duration::from_secs(300),
        }
    }
}

/// `408`, `429` and every `5xx` except `501 Not Implemented`.
pub fn default_retryable_statuses() -> BTreeSet<u16> {
    [408, 429]
        .into_iter()
        .chain((500..=599).filter(|s| *s != 501))
        .collect()
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets how many retries are allowed after the first attempt.
    ///
    /// `401`-triggered retries after a credential refresh are not counted.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry. Each later retry doubles it.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the exclusive upper bound of the random jitter added to each
    /// backoff. `Duration::ZERO` disables jitter.
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Replaces the set of statuses worth another attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// use steadfast::RetryPolicy;
    /// use http::StatusCode;
    ///
    /// // Only retry gateway errors; 429 becomes a permanent failure.
    /// let policy = RetryPolicy::default().with_retryable_statuses([502, 503, 504]);
    /// assert!(policy.is_retryable_status(StatusCode::BAD_GATEWAY));
    /// assert!(!policy.is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
    /// ```
    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Sets the timeout for each single attempt.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the budget for all attempts of one logical request, backoff
    /// sleeps and credential refresh included.
    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    /// Checks that the policy can run at least one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if either timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() || self.resource_timeout.is_zero() {
            return Err(Error::Configuration("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Whether another attempt is allowed after `attempt` (1-indexed) failed.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// `base_delay * 2^(attempt-1)`, saturating.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// The delay to sleep after `attempt` (1-indexed) failed: the base backoff
    /// plus jitter drawn uniformly from `[0, max_jitter)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff(attempt).saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_secs_f64();
        if max <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_jitter, Duration::from_millis(500));
        assert_eq!(policy.request_timeout, Duration::from_secs(30));
        assert_eq!(policy.resource_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_default_retryable_statuses() {
        let policy = RetryPolicy::default();
        for status in [408, 429, 500, 502, 503, 504, 599] {
            assert!(
                policy.is_retryable_status(StatusCode::from_u16(status).unwrap()),
                "{status} should be retryable"
            );
        }
        for status in [200, 400, 401, 403, 404, 422, 501] {
            assert!(
                !policy.is_retryable_status(StatusCode::from_u16(status).unwrap()),
                "{status} should not be retryable"
            );
        }
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let policy = RetryPolicy::default().with_max_jitter(Duration::ZERO);

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=policy.max_retries {
            let base = policy.base_backoff(attempt);
            for _ in 0..200 {
                let delay = policy.backoff(attempt);
                assert!(delay >= base, "{delay:?} < {base:?}");
                assert!(delay < base + policy.max_jitter, "{delay:?} too large");
            }
        }
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default().with_max_jitter(Duration::ZERO);
        assert!(policy.backoff(200) >= policy.backoff(32));
    }

    #[test]
    fn test_zero_timeouts_are_invalid() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(matches!(
            RetryPolicy::default()
                .with_request_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            RetryPolicy::default()
                .with_resource_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(3));
        assert!(!policy.allows_retry_after(4));
        assert!(!RetryPolicy::no_retries().allows_retry_after(1));
    }
}
