use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 处理器失败分类
///
/// 分类由处理器自己给出，管道只根据分类做路由决策，从不自行推断。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 网络抖动、下游暂不可用
    Transient,
    /// 一般运行时错误
    Runtime,
    /// 超出时间限制
    Timeout,
    /// 消息体格式错误
    InvalidPayload,
    /// 业务规则拒绝
    Rejected,
    /// 没有为该事件类型注册处理器
    Unhandled,
}

impl FailureKind {
    pub const ALL: [FailureKind; 6] = [
        FailureKind::Transient,
        FailureKind::Runtime,
        FailureKind::Timeout,
        FailureKind::InvalidPayload,
        FailureKind::Rejected,
        FailureKind::Unhandled,
    ];

    /// 默认的可重试分类
    pub fn default_retryable() -> Vec<FailureKind> {
        vec![
            FailureKind::Transient,
            FailureKind::Runtime,
            FailureKind::Timeout,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Runtime => "runtime",
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidPayload => "invalid_payload",
            FailureKind::Rejected => "rejected",
            FailureKind::Unhandled => "unhandled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 消息处理器返回的失败
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct HandlerFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl HandlerFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, reason: S) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
    pub fn transient<S: Into<String>>(reason: S) -> Self {
        Self::new(FailureKind::Transient, reason)
    }
    pub fn runtime<S: Into<String>>(reason: S) -> Self {
        Self::new(FailureKind::Runtime, reason)
    }
    pub fn timeout<S: Into<String>>(reason: S) -> Self {
        Self::new(FailureKind::Timeout, reason)
    }
    pub fn invalid_payload<S: Into<String>>(reason: S) -> Self {
        Self::new(FailureKind::InvalidPayload, reason)
    }
    pub fn rejected<S: Into<String>>(reason: S) -> Self {
        Self::new(FailureKind::Rejected, reason)
    }
    pub fn unhandled<S: Into<String>>(event_type: S) -> Self {
        Self::new(
            FailureKind::Unhandled,
            format!("没有为事件类型 '{}' 注册处理器", event_type.into()),
        )
    }
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("消息通道错误: {0}")]
    Lane(String),
    #[error("消息处理失败: {0}")]
    Handler(#[from] HandlerFailure),
    #[error("降级处理失败: {operation} - {message}")]
    Fallback { operation: String, message: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
}

pub type CourierResult<T> = Result<T, CourierError>;

impl CourierError {
    pub fn lane_error<S: Into<String>>(msg: S) -> Self {
        Self::Lane(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn fallback<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Fallback {
            operation: operation.into(),
            message: message.into(),
        }
    }
    /// 处理器内部透传错误时使用的失败分类
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CourierError::Handler(failure) => failure.kind,
            CourierError::Lane(_) => FailureKind::Transient,
            CourierError::Serialization(_) | CourierError::ValidationError(_) => {
                FailureKind::InvalidPayload
            }
            CourierError::Fallback { .. } | CourierError::Configuration(_) => FailureKind::Runtime,
        }
    }
}

impl From<CourierError> for HandlerFailure {
    fn from(err: CourierError) -> Self {
        match err {
            CourierError::Handler(failure) => failure,
            other => HandlerFailure::new(other.failure_kind(), other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests;
