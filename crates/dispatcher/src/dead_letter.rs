//! # 死信路由
//!
//! 不可重试或尝试次数耗尽的消息投递到 `<topic>-dlt`，随后恰好调用一次监控处理器。
//! 监控处理器失败时的行为由 [`TerminalStrategy`] 决定：
//!
//! - `FailOnDltError`：记录错误后丢弃消息
//! - `AlwaysRetryOnDltError`：把消息重新提交到重试路径
//! - `NoDeadLetter`：不投递死信通道，也不调用监控处理器

use std::sync::Arc;

use courier_config::{RetryPolicy, TerminalStrategy};
use courier_domain::lanes::dead_letter_lane;
use courier_domain::{
    CourierResult, DeadLetterReason, HandlerFailure, LaneSubstrate, Message, MonitoringSink,
};
use courier_infrastructure::MetricsCollector;
use tracing::{debug, error, instrument, warn};

use crate::retry_scheduler::{RetryPlan, RetryScheduler};

#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterOutcome {
    /// 已进入死信通道，监控处理器成功
    Delivered,
    /// 已进入死信通道，但监控处理器失败，消息被丢弃
    MonitoringFailed(HandlerFailure),
    /// 未投递死信通道直接丢弃
    Dropped,
    /// 监控处理器失败后重新提交到重试路径
    Resubmitted(RetryPlan),
}

#[derive(Clone)]
pub struct DeadLetterRouter {
    substrate: Arc<dyn LaneSubstrate>,
    sink: Arc<dyn MonitoringSink>,
    scheduler: RetryScheduler,
    metrics: MetricsCollector,
}

impl DeadLetterRouter {
    pub fn new(
        substrate: Arc<dyn LaneSubstrate>,
        sink: Arc<dyn MonitoringSink>,
        scheduler: RetryScheduler,
    ) -> Self {
        Self {
            substrate,
            sink,
            scheduler,
            metrics: MetricsCollector::new(),
        }
    }

    /// Errors only when a publish fails; the caller leaves the delivery unacknowledged.
    #[instrument(skip_all, fields(message_id = %message.id, reason = reason.as_str()))]
    pub async fn route(
        &self,
        message: &Message,
        reason: DeadLetterReason,
        policy: &RetryPolicy,
    ) -> CourierResult<DeadLetterOutcome> {
        let strategy = policy.terminal_strategy;
        if strategy == TerminalStrategy::NoDeadLetter {
            debug!("消息 {} 不再重试，策略为不投递死信，直接丢弃", message.id);
            self.metrics.record_dropped(&message.topic, reason);
            return Ok(DeadLetterOutcome::Dropped);
        }

        let lane = dead_letter_lane(&message.topic);
        self.substrate.publish(&lane, message.clone(), None).await?;
        self.metrics.record_dead_letter(&message.topic, reason);

        let failure = match self.sink.on_dead_letter(message, reason).await {
            Ok(()) => return Ok(DeadLetterOutcome::Delivered),
            Err(failure) => failure,
        };

        match strategy {
            TerminalStrategy::AlwaysRetryOnDltError => {
                warn!(
                    "死信监控处理失败，消息 {} 重新提交到重试路径: {}",
                    message.id, failure
                );
                let plan = self.scheduler.resubmit(message, policy).await?;
                Ok(DeadLetterOutcome::Resubmitted(plan))
            }
            _ => {
                error!(
                    message_id = %message.id,
                    topic = %message.topic,
                    error = %failure,
                    "死信监控处理失败，消息被丢弃"
                );
                self.metrics.record_dropped(&message.topic, reason);
                Ok(DeadLetterOutcome::MonitoringFailed(failure))
            }
        }
    }
}
