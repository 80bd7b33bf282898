//! 受熔断保护的同步调用网关
//!
//! 每次真实调用都在 `call_timeout` 内执行并恰好产生一条结果记录；超时的调用在本地放弃，
//! 记为 SlowCall 并返回降级值。熔断器打开时调用被短路，直接返回降级值且不记录结果。
//! 调用方在试探调用完成之前放弃 `call` 返回的future时，该试探按失败记录。

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use courier_domain::{CourierError, CourierResult, OutcomeKind};
use tokio::time::{timeout, Instant};
use tracing::{debug, instrument, warn};

use crate::breaker_registry::BreakerRegistry;
use crate::circuit_breaker::{Admission, BreakerSnapshot};
use crate::observability::MetricsCollector;

/// 触发降级的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackCause {
    ShortCircuited,
    TimedOut(Duration),
    Failed(String),
}

impl fmt::Display for FallbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackCause::ShortCircuited => write!(f, "circuit open"),
            FallbackCause::TimedOut(limit) => write!(f, "timed out after {limit:?}"),
            FallbackCause::Failed(reason) => write!(f, "call failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallGateway {
    registry: BreakerRegistry,
    metrics: MetricsCollector,
}

impl CallGateway {
    pub fn new(registry: BreakerRegistry) -> Self {
        Self {
            registry,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    pub async fn snapshot(&self, operation: &str) -> BreakerSnapshot {
        self.registry.get(operation).await.snapshot().await
    }

    /// Invokes `op` through the breaker for `operation`, falling back on short circuit,
    /// failure or timeout. Only a failing fallback produces an error.
    #[instrument(skip(self, op, fallback))]
    pub async fn call<T, E, F, Fut, FB, FE>(
        &self,
        operation: &str,
        op: F,
        fallback: FB,
    ) -> CourierResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        FB: FnOnce(FallbackCause) -> Result<T, FE>,
        FE: fmt::Display,
    {
        let breaker = self.registry.get(operation).await;
        let permit = match breaker.try_acquire().await {
            Admission::Permitted(permit) => permit,
            Admission::ShortCircuited => {
                debug!("Call short-circuited, using fallback");
                return self.fallback(operation, fallback, FallbackCause::ShortCircuited);
            }
        };

        let call_timeout = breaker.config().call_timeout;
        let started = Instant::now();
        let (kind, result) = match timeout(call_timeout, op()).await {
            Ok(Ok(value)) => (OutcomeKind::Success, Ok(value)),
            Ok(Err(e)) => (OutcomeKind::Failure, Err(FallbackCause::Failed(e.to_string()))),
            Err(_) => (OutcomeKind::SlowCall, Err(FallbackCause::TimedOut(call_timeout))),
        };

        permit.report(kind);
        self.metrics
            .record_gateway_outcome(operation, kind, started.elapsed());

        match result {
            Ok(value) => Ok(value),
            Err(cause) => {
                warn!(cause = %cause, "Downstream call did not succeed, using fallback");
                self.fallback(operation, fallback, cause)
            }
        }
    }

    /// Runs a synchronous closure on the blocking pool under the same breaker rules.
    /// A timed-out closure keeps running on its thread; its result is discarded.
    pub async fn call_blocking<T, E, F, FB, FE>(
        &self,
        operation: &str,
        op: F,
        fallback: FB,
    ) -> CourierResult<T>
    where
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        FB: FnOnce(FallbackCause) -> Result<T, FE>,
        FE: fmt::Display,
    {
        self.call(
            operation,
            move || async move {
                match tokio::task::spawn_blocking(op).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(join_error) => Err(format!("blocking call aborted: {join_error}")),
                }
            },
            fallback,
        )
        .await
    }

    pub async fn call_or_default<T, E, F, Fut>(
        &self,
        operation: &str,
        op: F,
        default: T,
    ) -> CourierResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.call(operation, op, move |_| Ok::<T, Infallible>(default))
            .await
    }

    fn fallback<T, FB, FE>(
        &self,
        operation: &str,
        fallback: FB,
        cause: FallbackCause,
    ) -> CourierResult<T>
    where
        FB: FnOnce(FallbackCause) -> Result<T, FE>,
        FE: fmt::Display,
    {
        fallback(cause).map_err(|e| {
            self.metrics.record_fallback_failure(operation);
            CourierError::fallback(operation, e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_config::{BreakerConfig, CircuitState, GatewayConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn gateway() -> CallGateway {
        let config = GatewayConfig {
            default_breaker: BreakerConfig {
                window_span: Duration::from_secs(10),
                minimum_calls: 5,
                failure_rate_threshold: 50.0,
                call_timeout: Duration::from_secs(3),
                open_duration: Duration::from_secs(60),
                half_open_trial_calls: 1,
            },
            ..GatewayConfig::default()
        };
        CallGateway::new(BreakerRegistry::new(config).unwrap())
    }

    async fn fail(gateway: &CallGateway, times: usize) {
        for _ in 0..times {
            let value = gateway
                .call(
                    "getEmployee",
                    || async { Err::<String, _>("connection refused") },
                    |_| Ok::<_, Infallible>("fallback".to_string()),
                )
                .await
                .unwrap();
            assert_eq!(value, "fallback");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_through() {
        let gateway = gateway();
        let value = gateway
            .call_or_default(
                "getEmployee",
                || async { Ok::<_, String>("Alice".to_string()) },
                "Anonymous Employee".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(value, "Alice");
        assert_eq!(gateway.snapshot("getEmployee").await.sample_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_fallback_and_slow_call() {
        let gateway = gateway();
        let started = Instant::now();

        let value = gateway
            .call(
                "getEmployee",
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>("too late".to_string())
                },
                |cause| {
                    assert_eq!(cause, FallbackCause::TimedOut(Duration::from_secs(3)));
                    Ok::<_, Infallible>("Anonymous Employee".to_string())
                },
            )
            .await
            .unwrap();

        assert_eq!(value, "Anonymous Employee");
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        let snapshot = gateway.snapshot("getEmployee").await;
        assert_eq!(snapshot.sample_count, 1);
        assert_eq!(snapshot.slow_call_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits_without_recording() {
        let gateway = gateway();
        fail(&gateway, 5).await;
        assert_eq!(gateway.snapshot("getEmployee").await.state, CircuitState::Open);

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let value = gateway
            .call(
                "getEmployee",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("real".to_string())
                },
                |cause| {
                    assert_eq!(cause, FallbackCause::ShortCircuited);
                    Ok::<_, Infallible>("fallback".to_string())
                },
            )
            .await
            .unwrap();

        assert_eq!(value, "fallback");
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        let snapshot = gateway.snapshot("getEmployee").await;
        assert_eq!(snapshot.sample_count, 5);
        assert_eq!(snapshot.short_circuit_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_fallback_surfaces_error() {
        let gateway = gateway();
        let result = gateway
            .call(
                "getEmployee",
                || async { Err::<String, _>("boom") },
                |_| Err::<String, _>("no default available"),
            )
            .await;

        match result {
            Err(CourierError::Fallback { operation, message }) => {
                assert_eq!(operation, "getEmployee");
                assert_eq!(message, "no default available");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_concurrent_second_call_gets_fallback() {
        let gateway = gateway();
        fail(&gateway, 5).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let trial = gateway.call(
            "getEmployee",
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, String>("trial".to_string())
            },
            |_| Ok::<_, Infallible>("fallback".to_string()),
        );
        let concurrent = async {
            // 让试探调用先获得许可
            tokio::time::sleep(Duration::from_millis(10)).await;
            gateway
                .call(
                    "getEmployee",
                    || async { Ok::<_, String>("second".to_string()) },
                    |_| Ok::<_, Infallible>("fallback".to_string()),
                )
                .await
        };

        let (first, second) = tokio::join!(trial, concurrent);
        assert_eq!(first.unwrap(), "trial");
        assert_eq!(second.unwrap(), "fallback");
        assert_eq!(gateway.snapshot("getEmployee").await.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_call_does_not_wedge_breaker() {
        let gateway = gateway();
        fail(&gateway, 5).await;
        tokio::time::advance(Duration::from_secs(60)).await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            gateway.call(
                "getEmployee",
                || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, String>("trial".to_string())
                },
                |_| Ok::<_, Infallible>("fallback".to_string()),
            ),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(gateway.snapshot("getEmployee").await.state, CircuitState::Open);

        let invocations = Arc::new(AtomicUsize::new(0));
        tokio::time::advance(Duration::from_secs(60)).await;
        let counter = invocations.clone();
        let value = gateway
            .call(
                "getEmployee",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("Alice".to_string())
                },
                |_| Ok::<_, Infallible>("fallback".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(value, "Alice");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.snapshot("getEmployee").await.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_blocking() {
        let gateway = gateway();
        let value = gateway
            .call_blocking(
                "computeChecksum",
                || Ok::<_, String>(21 * 2),
                |_| Ok::<_, Infallible>(0),
            )
            .await
            .unwrap();
        assert_eq!(value, 42);

        let value = gateway
            .call_blocking(
                "computeChecksum",
                || -> Result<i32, String> { panic!("checksum table corrupted") },
                |cause| {
                    assert!(matches!(cause, FallbackCause::Failed(_)));
                    Ok::<_, Infallible>(-1)
                },
            )
            .await
            .unwrap();
        assert_eq!(value, -1);
    }

    #[tokio::test]
    async fn test_call_blocking_timeout_is_abandoned() {
        let config = GatewayConfig::default().with_override(
            "slowReport",
            BreakerConfig {
                call_timeout: Duration::from_millis(50),
                ..BreakerConfig::default()
            },
        );
        let gateway = CallGateway::new(BreakerRegistry::new(config).unwrap());

        let value = gateway
            .call_blocking(
                "slowReport",
                || {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok::<_, String>("report".to_string())
                },
                |_| Ok::<_, Infallible>("cached report".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(value, "cached report");
        assert_eq!(gateway.snapshot("slowReport").await.slow_call_count, 1);
    }
}
