use std::time::Duration;

use courier_config::CircuitState;
use courier_domain::{DeadLetterReason, FailureKind, OutcomeKind};
use metrics::{counter, gauge, histogram};
use tracing::debug;

/// Metrics collector for the courier pipelines and call gateway
///
/// 指标通过 `metrics` facade 记录，未安装 recorder 时所有调用都是空操作。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // Pipeline metrics

    /// Record a successfully handled message
    pub fn record_handled(&self, topic: &str, lane: &str, duration: Duration) {
        counter!(
            "courier_messages_handled_total",
            "topic" => topic.to_string(),
            "lane" => lane.to_string()
        )
        .increment(1);
        histogram!("courier_handler_duration_seconds", "topic" => topic.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a failed handler attempt
    pub fn record_failed_attempt(&self, topic: &str, lane: &str, kind: FailureKind) {
        counter!(
            "courier_handler_failures_total",
            "topic" => topic.to_string(),
            "lane" => lane.to_string(),
            "kind" => kind.as_str()
        )
        .increment(1);
    }

    pub fn record_retry(&self, topic: &str, tier: u32, delay: Duration) {
        counter!(
            "courier_retries_total",
            "topic" => topic.to_string(),
            "tier" => tier.to_string()
        )
        .increment(1);
        histogram!("courier_retry_delay_seconds", "topic" => topic.to_string())
            .record(delay.as_secs_f64());
    }

    pub fn record_dead_letter(&self, topic: &str, reason: DeadLetterReason) {
        counter!(
            "courier_dead_letters_total",
            "topic" => topic.to_string(),
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    pub fn record_dropped(&self, topic: &str, reason: DeadLetterReason) {
        counter!(
            "courier_messages_dropped_total",
            "topic" => topic.to_string(),
            "reason" => reason.as_str()
        )
        .increment(1);
    }

    pub fn record_resubmitted(&self, topic: &str) {
        counter!("courier_dead_letter_resubmissions_total", "topic" => topic.to_string())
            .increment(1);
    }

    pub fn record_routing_failure(&self, topic: &str) {
        counter!("courier_routing_failures_total", "topic" => topic.to_string()).increment(1);
    }

    // Lane metrics

    pub fn update_lane_depth(&self, lane: &str, depth: usize) {
        gauge!("courier_lane_depth", "lane" => lane.to_string()).set(depth as f64);
    }

    // Gateway metrics

    /// Record one real downstream invocation
    pub fn record_gateway_outcome(&self, operation: &str, outcome: OutcomeKind, duration: Duration) {
        counter!(
            "courier_gateway_calls_total",
            "operation" => operation.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!(
            "courier_gateway_call_duration_seconds",
            "operation" => operation.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_short_circuit(&self, operation: &str) {
        counter!(
            "courier_gateway_short_circuits_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }

    pub fn record_fallback_failure(&self, operation: &str) {
        counter!(
            "courier_gateway_fallback_failures_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }

    pub fn update_breaker_state(&self, operation: &str, state: CircuitState) {
        gauge!("courier_breaker_state", "operation" => operation.to_string())
            .set(state.as_gauge());
        debug!(operation = operation, state = %state, "Breaker state gauge updated");
    }
}
