use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::BreakerConfig;
use crate::validation::{ConfigValidator, ValidationUtils};

/// Breaker settings for the call gateway: a default applied to every operation and
/// optional per-operation overrides keyed by operation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub default_breaker: BreakerConfig,
    pub breakers: HashMap<String, BreakerConfig>,
}

impl GatewayConfig {
    pub fn breaker_for(&self, operation: &str) -> &BreakerConfig {
        self.breakers.get(operation).unwrap_or(&self.default_breaker)
    }

    pub fn with_override<S: Into<String>>(mut self, operation: S, config: BreakerConfig) -> Self {
        self.breakers.insert(operation.into(), config);
        self
    }
}

impl ConfigValidator for GatewayConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.default_breaker.validate()?;
        for (operation, breaker) in &self.breakers {
            ValidationUtils::validate_not_empty(operation, "gateway.breakers key")?;
            breaker.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_breaker_override_lookup() {
        let custom = BreakerConfig {
            call_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let config = GatewayConfig::default().with_override("getEmployee", custom.clone());

        assert_eq!(config.breaker_for("getEmployee"), &custom);
        assert_eq!(config.breaker_for("getBook"), &BreakerConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let config = GatewayConfig::default().with_override(
            "getEmployee",
            BreakerConfig {
                minimum_calls: 0,
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }
}
