use std::collections::BTreeSet;
use std::time::Duration;

use courier_errors::FailureKind;
use serde::{Deserialize, Serialize};

use crate::duration_ms;
use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// What happens to a message once it can no longer be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStrategy {
    /// Dead-letter the message; if the monitoring handler fails, drop it and surface the error.
    #[default]
    FailOnDltError,
    /// Dead-letter the message; if the monitoring handler fails, send it back to the retry path.
    AlwaysRetryOnDltError,
    /// Drop exhausted messages without a terminal lane or monitoring call.
    NoDeadLetter,
}

impl TerminalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStrategy::FailOnDltError => "fail_on_dlt_error",
            TerminalStrategy::AlwaysRetryOnDltError => "always_retry_on_dlt_error",
            TerminalStrategy::NoDeadLetter => "no_dead_letter",
        }
    }
}

/// Backoff and dead-letter policy for one listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub retryable_failure_kinds: BTreeSet<FailureKind>,
    pub terminal_strategy: TerminalStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            retryable_failure_kinds: FailureKind::default_retryable().into_iter().collect(),
            terminal_strategy: TerminalStrategy::FailOnDltError,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable_failure_kinds.contains(&kind)
    }

    /// Number of retry tiers behind the base lane.
    pub fn retry_tiers(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_retryable_kinds<I: IntoIterator<Item = FailureKind>>(mut self, kinds: I) -> Self {
        self.retryable_failure_kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_terminal_strategy(mut self, strategy: TerminalStrategy) -> Self {
        self.terminal_strategy = strategy;
        self
    }
}

impl ConfigValidator for RetryPolicy {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        ValidationUtils::validate_positive_duration(self.initial_delay, "initial_delay")?;

        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_matches_listener_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.terminal_strategy, TerminalStrategy::FailOnDltError);
        assert_eq!(policy.retry_tiers(), 3);
        assert!(policy.is_retryable(FailureKind::Transient));
        assert!(!policy.is_retryable(FailureKind::InvalidPayload));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_validation() {
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default().with_max_attempts(1).validate().is_ok());
        assert!(RetryPolicy::default()
            .with_initial_delay(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RetryPolicy::default().with_multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::default()
            .with_multiplier(f64::INFINITY)
            .validate()
            .is_err());
        assert!(RetryPolicy::default().with_multiplier(1.0).validate().is_ok());
    }

    #[test]
    fn test_terminal_strategy_serde() {
        let parsed: TerminalStrategy = serde_json::from_str("\"always_retry_on_dlt_error\"").unwrap();
        assert_eq!(parsed, TerminalStrategy::AlwaysRetryOnDltError);
        assert_eq!(
            serde_json::to_string(&TerminalStrategy::NoDeadLetter).unwrap(),
            format!("\"{}\"", TerminalStrategy::NoDeadLetter.as_str())
        );
    }

    #[test]
    fn test_retry_policy_from_partial_json() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 2, "initial_delay_ms": 500, "retryable_failure_kinds": ["transient"]}"#,
        )
        .unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.multiplier, 2.0);
        assert!(policy.is_retryable(FailureKind::Transient));
        assert!(!policy.is_retryable(FailureKind::Runtime));
    }
}
