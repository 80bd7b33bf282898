use std::sync::Arc;
use std::time::Duration;

use courier_config::RetryPolicy;
use courier_domain::lanes::retry_lane;
use courier_domain::{CourierError, CourierResult, HandlerFailure, LaneSubstrate, Message};
use courier_infrastructure::MetricsCollector;
use tracing::{info, instrument};

/// 计算第 `attempt` 次重试（从0开始）的退避延迟
///
/// `initial_delay * multiplier^attempt`，溢出时饱和为 `Duration::MAX`。
pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = policy.multiplier.powf(f64::from(attempt));
    let seconds = policy.initial_delay.as_secs_f64() * factor;
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// 一次重试的目标
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    pub delay: Duration,
    pub target_lane: String,
    pub next_attempt: u32,
}

/// Plans the retry for a message that just failed, or `None` once attempts are exhausted.
pub fn plan(message: &Message, policy: &RetryPolicy) -> Option<RetryPlan> {
    if message.is_attempts_exhausted(policy.max_attempts) {
        return None;
    }
    let next_attempt = message.attempt + 1;
    Some(RetryPlan {
        delay: delay_for(policy, message.attempt),
        target_lane: retry_lane(&message.topic, next_attempt),
        next_attempt,
    })
}

/// 重试调度器：递增尝试次数，并以延迟可见的方式重新发布到重试通道
#[derive(Clone)]
pub struct RetryScheduler {
    substrate: Arc<dyn LaneSubstrate>,
    metrics: MetricsCollector,
}

impl RetryScheduler {
    pub fn new(substrate: Arc<dyn LaneSubstrate>) -> Self {
        Self {
            substrate,
            metrics: MetricsCollector::new(),
        }
    }

    #[instrument(skip_all, fields(message_id = %message.id, attempt = message.attempt))]
    pub async fn schedule(
        &self,
        message: &Message,
        policy: &RetryPolicy,
        failure: &HandlerFailure,
    ) -> CourierResult<RetryPlan> {
        let plan = plan(message, policy).ok_or_else(|| {
            CourierError::validation_error(format!(
                "message {} has exhausted {} attempts",
                message.id, policy.max_attempts
            ))
        })?;

        let mut retry = message.clone();
        retry.increment_attempt();
        retry.last_failure = Some(failure.clone());
        self.substrate
            .publish(&plan.target_lane, retry, Some(plan.delay))
            .await?;

        self.metrics
            .record_retry(&message.topic, plan.next_attempt, plan.delay);
        info!(
            "消息 {} 安排第 {} 次重试，目标通道: {}，延迟: {:?}",
            message.id, plan.next_attempt, plan.target_lane, plan.delay
        );
        Ok(plan)
    }

    /// 把已耗尽的消息送回最后一个重试层级（`max_attempts` 为1时送回基础通道），尝试次数保持不变
    #[instrument(skip_all, fields(message_id = %message.id))]
    pub async fn resubmit(&self, message: &Message, policy: &RetryPolicy) -> CourierResult<RetryPlan> {
        let tiers = policy.retry_tiers();
        let target_lane = if tiers == 0 {
            message.topic.clone()
        } else {
            retry_lane(&message.topic, tiers)
        };
        let delay = delay_for(policy, tiers.saturating_sub(1));

        self.substrate
            .publish(&target_lane, message.clone(), Some(delay))
            .await?;

        self.metrics.record_resubmitted(&message.topic);
        info!(
            "消息 {} 重新提交到通道 {}，延迟: {:?}",
            message.id, target_lane, delay
        );
        Ok(RetryPlan {
            delay,
            target_lane,
            next_attempt: message.attempt,
        })
    }
}
