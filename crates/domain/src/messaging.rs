use std::time::Duration;

use async_trait::async_trait;
use courier_errors::CourierResult;
use futures::stream::BoxStream;

use crate::entities::{Delivery, Message};

/// 一个消费组在某通道上的投递序列：惰性、无限，重新订阅即可恢复
pub type MessageStream = BoxStream<'static, Delivery>;

/// Interface for the lane substrate that carries messages between services
#[async_trait]
pub trait LaneSubstrate: Send + Sync {
    /// Appends `message` to `lane`; it becomes visible to consumers once `visible_after` elapses.
    async fn publish(
        &self,
        lane: &str,
        message: Message,
        visible_after: Option<Duration>,
    ) -> CourierResult<()>;

    /// Binds `consumer_group` to `lane`. Unacknowledged deliveries of a group that has no
    /// other live subscription are delivered again.
    async fn subscribe(&self, lane: &str, consumer_group: &str) -> CourierResult<MessageStream>;

    async fn ack(&self, delivery: &Delivery) -> CourierResult<()>;

    /// Returns an unacknowledged delivery to its group; it is delivered again once
    /// `redeliver_after` elapses, without waiting for a new subscription.
    async fn nack(&self, delivery: &Delivery, redeliver_after: Duration) -> CourierResult<()>;

    /// Messages currently retained by the lane.
    async fn lane_depth(&self, lane: &str) -> CourierResult<usize>;

    /// Snapshot of retained messages, oldest first. Used to inspect terminal lanes.
    async fn read_lane(&self, lane: &str) -> CourierResult<Vec<Message>>;
}
