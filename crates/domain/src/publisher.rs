use std::sync::Arc;

use courier_errors::CourierResult;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::entities::Message;
use crate::messaging::LaneSubstrate;

/// 向主题的基础通道发布消息
#[derive(Clone)]
pub struct EventPublisher {
    substrate: Arc<dyn LaneSubstrate>,
}

impl EventPublisher {
    pub fn new(substrate: Arc<dyn LaneSubstrate>) -> Self {
        Self { substrate }
    }

    /// Publishes a raw payload; the event type defaults to the topic.
    pub async fn send<P: Into<Vec<u8>>>(&self, topic: &str, payload: P) -> CourierResult<String> {
        self.send_message(Message::new(topic, payload)).await
    }

    /// Publishes a JSON-encoded event under an explicit event type.
    pub async fn send_event<T: Serialize + Sync>(
        &self,
        topic: &str,
        event_type: &str,
        event: &T,
    ) -> CourierResult<String> {
        let message = Message::event(topic, event_type, event)?;
        self.send_message(message).await
    }

    #[instrument(skip(self, message), fields(message_id = %message.id, topic = %message.topic))]
    pub async fn send_message(&self, mut message: Message) -> CourierResult<String> {
        // 新消息总是从基础通道开始
        message.lane = message.topic.clone();
        message.attempt = 0;
        let id = message.id.clone();
        let lane = message.topic.clone();
        self.substrate.publish(&lane, message, None).await?;
        debug!("消息已发布");
        Ok(id)
    }
}
