//! Reconnection policy.
//!
//! The policy is a pure decision function: given the number of the attempt
//! about to be made, it either schedules it after a delay or gives up. All
//! timing lives in the supervisor; the policy never sleeps.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default delay between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default cap on consecutive failed attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What to do about the next reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make the attempt after waiting this long.
    Retry(Duration),
    /// Stop retrying; the cycle ends in `Failed`.
    GiveUp,
}

/// How to treat a service discovery failure on an otherwise healthy link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryFailurePolicy {
    /// Log and keep the link up, waiting for a disconnect or stop.
    #[default]
    LogAndWait,
    /// Drop the link and feed the failure into the reconnect policy.
    DropAndRetry,
}

/// Configuration for reconnection behaviour.
///
/// The delay between attempts is constant; attempt numbers never change
/// the wait. An optional jitter spreads wakeups when several daemons share
/// a host.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay between attempts.
    pub delay: Duration,
    /// Give up after this many consecutive failed attempts.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
    /// What a discovery failure does to the cycle.
    pub on_discovery_failure: DiscoveryFailurePolicy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            jitter: false,
            on_discovery_failure: DiscoveryFailurePolicy::default(),
        }
    }
}

impl ReconnectPolicy {
    /// Set the delay between attempts.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the maximum number of consecutive failed attempts.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retry forever.
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Enable or disable delay jitter.
    #[must_use]
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the discovery failure handling.
    #[must_use]
    pub fn on_discovery_failure(mut self, policy: DiscoveryFailurePolicy) -> Self {
        self.on_discovery_failure = policy;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.delay.is_zero() {
            return Err(Error::InvalidConfig(
                "retry delay must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1 (or unlimited)".to_string(),
            ));
        }
        Ok(())
    }

    /// Decide the fate of attempt number `attempt` (1-based).
    ///
    /// Attempt numbers count consecutive failures within one cycle and
    /// reset whenever a connection is established.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if let Some(max) = self.max_attempts
            && attempt > max
        {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff_delay())
    }

    /// The delay to wait out before the next attempt, with jitter applied
    /// when enabled.
    pub fn backoff_delay(&self) -> Duration {
        if !self.jitter {
            return self.delay;
        }
        let spread = self.delay.mul_f64(0.25);
        self.delay + spread.mul_f64(rand::random::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, Some(5));
        assert!(!policy.jitter);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_constant_delay() {
        let policy = ReconnectPolicy::default().max_attempts(3);
        for attempt in 1..=3 {
            assert_eq!(
                policy.decide(attempt),
                RetryDecision::Retry(Duration::from_secs(5)),
                "attempt {attempt} should retry with the constant delay"
            );
        }
        assert_eq!(policy.decide(4), RetryDecision::GiveUp);
    }

    #[test]
    fn test_unlimited_never_gives_up() {
        let policy = ReconnectPolicy::default().unlimited();
        assert!(matches!(policy.decide(10_000), RetryDecision::Retry(_)));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = ReconnectPolicy::default()
            .delay(Duration::from_secs(4))
            .jitter(true)
            .unlimited();
        for _ in 0..100 {
            let RetryDecision::Retry(delay) = policy.decide(1) else {
                panic!("unlimited policy gave up");
            };
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_validate_rejects_degenerate_configs() {
        assert!(
            ReconnectPolicy::default()
                .delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(ReconnectPolicy::default().max_attempts(0).validate().is_err());
    }
}
