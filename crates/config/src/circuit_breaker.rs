use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_ms;
use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding used for the state gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one circuit breaker instance.
///
/// `failure_rate_threshold` is a percentage in `0..=100`. A call that does not
/// finish within `call_timeout` is recorded as a slow call and counts as a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    #[serde(with = "duration_ms", rename = "window_span_ms")]
    pub window_span: Duration,
    pub minimum_calls: usize,
    pub failure_rate_threshold: f64,
    #[serde(with = "duration_ms", rename = "call_timeout_ms")]
    pub call_timeout: Duration,
    #[serde(with = "duration_ms", rename = "open_duration_ms")]
    pub open_duration: Duration,
    pub half_open_trial_calls: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_span: Duration::from_secs(10),
            minimum_calls: 5,
            failure_rate_threshold: 50.0,
            call_timeout: Duration::from_secs(3),
            open_duration: Duration::from_secs(60),
            half_open_trial_calls: 1,
        }
    }
}

impl ConfigValidator for BreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_positive_duration(self.window_span, "window_span")?;
        ValidationUtils::validate_positive_duration(self.call_timeout, "call_timeout")?;
        ValidationUtils::validate_positive_duration(self.open_duration, "open_duration")?;

        if self.minimum_calls == 0 {
            return Err(ConfigError::Validation(
                "minimum_calls must be greater than 0".to_string(),
            ));
        }

        if !self.failure_rate_threshold.is_finite()
            || !(0.0..=100.0).contains(&self.failure_rate_threshold)
        {
            return Err(ConfigError::Validation(format!(
                "failure_rate_threshold must be within 0..=100, got {}",
                self.failure_rate_threshold
            )));
        }

        if self.half_open_trial_calls == 0 {
            return Err(ConfigError::Validation(
                "half_open_trial_calls must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
