//! Test helper utilities and common testing patterns
//!
//! Waiting helpers use `tokio::time`, so they also work under a paused clock.

use std::future::Future;
use std::time::Duration;

use courier_config::RetryPolicy;
use courier_domain::AttemptRecord;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }

    /// Collects `count` attempt records, or fewer if `timeout` elapses first
    pub async fn collect_records(
        receiver: &mut broadcast::Receiver<AttemptRecord>,
        count: usize,
        timeout: Duration,
    ) -> Vec<AttemptRecord> {
        let mut records = Vec::with_capacity(count);
        let deadline = Instant::now() + timeout;
        while records.len() < count {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Ok(Ok(record)) => records.push(record),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }
        records
    }
}

/// Retry policies commonly used by pipeline tests
pub struct TestPolicies;

impl TestPolicies {
    /// 1s initial delay, x2 multiplier, 4 attempts
    pub fn standard() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Short delays for tests that run on the real clock
    pub fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(10))
            .with_multiplier(1.0)
    }
}
