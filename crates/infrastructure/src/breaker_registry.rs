use std::collections::HashMap;
use std::sync::Arc;

use courier_config::{BreakerConfig, ConfigValidator, GatewayConfig};
use courier_domain::CourierResult;
use tokio::sync::RwLock;
use tracing::info;

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};

/// 按下游操作名维护熔断器，首次使用时按默认配置或覆盖配置创建
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    config: Arc<GatewayConfig>,
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::from_validated(GatewayConfig::default())
    }
}

impl BreakerRegistry {
    /// Validates every breaker configuration before any breaker is created.
    pub fn new(config: GatewayConfig) -> CourierResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config_for(&self, operation: &str) -> BreakerConfig {
        self.config.breaker_for(operation).clone()
    }

    pub async fn get(&self, operation: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().await.get(operation) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                info!(operation = operation, "Creating circuit breaker");
                CircuitBreaker::new(operation, self.config_for(operation))
            })
            .clone()
    }

    pub async fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        let breakers: Vec<CircuitBreaker> = self.breakers.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push((breaker.name().to_string(), breaker.snapshot().await));
        }
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_operation_shares_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get("getEmployee").await;
        let b = registry.get("getEmployee").await;
        let c = registry.get("listBooks").await;

        assert_eq!(a.name(), b.name());
        assert_eq!(registry.snapshots().await.len(), 2);
        assert_eq!(c.name(), "listBooks");
    }

    #[tokio::test]
    async fn test_per_operation_override() {
        let override_config = BreakerConfig {
            call_timeout: Duration::from_millis(500),
            ..BreakerConfig::default()
        };
        let config = GatewayConfig::default().with_override("getEmployee", override_config);
        let registry = BreakerRegistry::new(config).unwrap();

        let employee = registry.get("getEmployee").await;
        let other = registry.get("listBooks").await;
        assert_eq!(employee.config().call_timeout, Duration::from_millis(500));
        assert_eq!(other.config().call_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = GatewayConfig::default().with_override(
            "getEmployee",
            BreakerConfig {
                failure_rate_threshold: 120.0,
                ..BreakerConfig::default()
            },
        );
        assert!(BreakerRegistry::new(config).is_err());
    }
}
