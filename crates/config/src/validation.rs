use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a duration is strictly positive
    pub fn validate_positive_duration(value: Duration, field_name: &str) -> ConfigResult<()> {
        if value.is_zero() {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Validate that a count is reasonable
    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 1024 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 1024"
            )));
        }
        Ok(())
    }

    /// Validate that a lane or topic name can be used to derive retry and dead-letter lanes
    pub fn validate_lane_name(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        if value.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "{field_name} must not contain whitespace: '{value}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lane_name() {
        assert!(ValidationUtils::validate_lane_name("orders", "topic").is_ok());
        assert!(ValidationUtils::validate_lane_name("", "topic").is_err());
        assert!(ValidationUtils::validate_lane_name("my topic", "topic").is_err());
    }

    #[test]
    fn test_validate_count_bounds() {
        assert!(ValidationUtils::validate_count(0, "concurrency").is_err());
        assert!(ValidationUtils::validate_count(8, "concurrency").is_ok());
        assert!(ValidationUtils::validate_count(4096, "concurrency").is_err());
    }
}
