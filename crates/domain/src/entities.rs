use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_errors::{FailureKind, HandlerFailure};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 在通道中流转的消息
///
/// 由上游发布者创建一次，之后只有重试调度器会修改它（递增尝试次数、改写目标通道）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// 逻辑主题，也是基础通道名
    pub topic: String,
    /// 处理器注册表使用的事件类型，默认与主题相同
    pub event_type: String,
    /// 当前所在通道
    pub lane: String,
    pub payload: Vec<u8>,
    /// 已失败的尝试次数，从0开始
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    /// 最近一次处理失败，重试或进入死信时附带
    pub last_failure: Option<HandlerFailure>,
}

impl Message {
    pub fn new<T: Into<String>, P: Into<Vec<u8>>>(topic: T, payload: P) -> Self {
        let topic = topic.into();
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: topic.clone(),
            lane: topic.clone(),
            topic,
            payload: payload.into(),
            attempt: 0,
            enqueued_at: Utc::now(),
            correlation_id: None,
            last_failure: None,
        }
    }

    /// 以JSON编码事件体创建消息
    pub fn event<T: Serialize>(
        topic: &str,
        event_type: &str,
        event: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(event)?;
        Ok(Self::new(topic, payload).with_event_type(event_type))
    }

    pub fn with_event_type<S: Into<String>>(mut self, event_type: S) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_correlation_id<S: Into<String>>(mut self, correlation_id: S) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn increment_attempt(&mut self) {
        self.attempt += 1;
    }

    pub fn is_attempts_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt + 1 >= max_attempts
    }

    /// 以UTF-8文本读取消息体
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// 一次投递：消息及其所在通道、消费组与偏移量
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub lane: String,
    pub consumer_group: String,
    pub offset: u64,
}

/// 一次下游调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    Failure,
    /// 超过调用时限，按失败计入失败率
    SlowCall,
}

impl OutcomeKind {
    pub fn is_failure(&self) -> bool {
        !matches!(self, OutcomeKind::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failure => "failure",
            OutcomeKind::SlowCall => "slow_call",
        }
    }
}

/// 进入死信的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterReason {
    NonRetryable,
    AttemptsExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::NonRetryable => "non_retryable",
            DeadLetterReason::AttemptsExhausted => "attempts_exhausted",
        }
    }
}

/// 一次失败尝试之后的路由决策
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Retry { lane: String, delay: Duration },
    DeadLettered { reason: DeadLetterReason },
    Dropped { reason: DeadLetterReason },
    Resubmitted { lane: String, delay: Duration },
    /// 路由本身失败，消息退回通道稍后重新投递
    RoutingFailed,
}

/// 每次失败尝试对外可见的监控记录
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub message_id: String,
    pub topic: String,
    pub lane: String,
    /// 失败的是第几次尝试，从1开始
    pub attempt: u32,
    pub failure_kind: FailureKind,
    pub decision: RoutingDecision,
    pub recorded_at: DateTime<Utc>,
}
