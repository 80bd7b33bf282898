//! Test data builders for creating test messages
//!
//! Builders provide sensible defaults and easy customization.

use chrono::{DateTime, Utc};
use courier_domain::{HandlerFailure, Message};

/// Builder for creating test Message entities
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn new(topic: &str) -> Self {
        Self {
            message: Message::new(topic, "{}"),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.message.id = id.to_string();
        self
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.message.payload = payload.as_bytes().to_vec();
        self
    }

    pub fn with_json(mut self, payload: serde_json::Value) -> Self {
        self.message.payload = payload.to_string().into_bytes();
        self
    }

    pub fn with_event_type(mut self, event_type: &str) -> Self {
        self.message.event_type = event_type.to_string();
        self
    }

    pub fn with_lane(mut self, lane: &str) -> Self {
        self.message.lane = lane.to_string();
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.message.attempt = attempt;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.message.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_last_failure(mut self, failure: HandlerFailure) -> Self {
        self.message.last_failure = Some(failure);
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.message.enqueued_at = enqueued_at;
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
