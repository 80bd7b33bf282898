//! # 消息处理器
//!
//! 业务处理器按事件类型注册到 [`HandlerRegistry`]，由流水线在消费时解析。
//! 注册是显式的：同一事件类型只能有一个处理器，未注册的事件类型
//! 在分派时产生 `Unhandled` 失败，随后按普通失败走重试/死信路由。
//!
//! [`MonitoringSink`] 是死信通道的消费端，接收每一条进入死信的消息。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use courier_errors::{CourierError, CourierResult, HandlerFailure};
use tracing::warn;

use crate::entities::{DeadLetterReason, Message};

/// Business handler invoked once per delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerFailure>> + Send>>;

/// 以闭包实现的处理器
pub struct FnHandler {
    func: Box<dyn Fn(Message) -> HandlerFuture + Send + Sync>,
}

#[async_trait]
impl MessageHandler for FnHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure> {
        (self.func)(message.clone()).await
    }
}

/// Wraps an async closure into a shareable handler.
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
{
    Arc::new(FnHandler {
        func: Box::new(move |message| Box::pin(func(message))),
    })
}

/// 死信通道的消费端
#[async_trait]
pub trait MonitoringSink: Send + Sync {
    async fn on_dead_letter(
        &self,
        message: &Message,
        reason: DeadLetterReason,
    ) -> Result<(), HandlerFailure>;
}

/// 只记录日志的死信消费端
#[derive(Debug, Default, Clone)]
pub struct LoggingMonitoringSink;

#[async_trait]
impl MonitoringSink for LoggingMonitoringSink {
    async fn on_dead_letter(
        &self,
        message: &Message,
        reason: DeadLetterReason,
    ) -> Result<(), HandlerFailure> {
        warn!(
            message_id = %message.id,
            topic = %message.topic,
            attempt = message.attempt,
            reason = reason.as_str(),
            failure = ?message.last_failure,
            "消息进入死信通道"
        );
        Ok(())
    }
}

/// 事件类型到处理器的显式映射
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`. A second registration for the same type is rejected.
    pub fn register<S: Into<String>>(
        &mut self,
        event_type: S,
        handler: Arc<dyn MessageHandler>,
    ) -> CourierResult<()> {
        let event_type = event_type.into();
        if self.handlers.contains_key(&event_type) {
            return Err(CourierError::validation_error(format!(
                "事件类型 {event_type} 已注册处理器"
            )));
        }
        self.handlers.insert(event_type, handler);
        Ok(())
    }

    pub fn with<S: Into<String>>(
        mut self,
        event_type: S,
        handler: Arc<dyn MessageHandler>,
    ) -> CourierResult<Self> {
        self.register(event_type, handler)?;
        Ok(self)
    }

    pub fn resolve(&self, event_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(event_type).cloned()
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolves and runs the handler for `message`; an unknown event type fails as `Unhandled`.
    pub async fn dispatch(&self, message: &Message) -> Result<(), HandlerFailure> {
        match self.resolve(&message.event_type) {
            Some(handler) => handler.handle(message).await,
            None => Err(HandlerFailure::unhandled(&message.event_type)),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
