//! 内存通道实现
//!
//! 每个通道是一条只追加日志，消费组各自维护读取游标和未确认集合。
//! 延迟可见的消息在到期之前阻塞其后的消息（队头等待），因此同一通道内
//! 始终按发布顺序投递。所有消费组都确认过的日志前缀会被压缩掉。
//! 死信通道没有消费组，永远不会被压缩，因此使用单独的容量上限。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use courier_domain::lanes::is_dead_letter_lane;
use courier_domain::messaging::{LaneSubstrate, MessageStream};
use courier_domain::{CourierError, CourierResult, Delivery, Message};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 延迟溢出时使用的可见时间
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct InMemoryLaneConfig {
    /// 单个通道最多保留的消息数（0表示无限制）
    pub max_lane_size: usize,
    /// 单个死信通道最多保留的消息数（0表示无限制）
    pub max_dead_letter_lane_size: usize,
}

impl Default for InMemoryLaneConfig {
    fn default() -> Self {
        Self {
            max_lane_size: 100_000,
            max_dead_letter_lane_size: 0,
        }
    }
}

impl InMemoryLaneConfig {
    fn capacity_of(&self, lane: &str) -> usize {
        if is_dead_letter_lane(lane) {
            self.max_dead_letter_lane_size
        } else {
            self.max_lane_size
        }
    }
}

#[derive(Debug)]
struct LaneEntry {
    offset: u64,
    message: Message,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    /// 下一个尚未投递的偏移量
    next_offset: u64,
    /// 已投递未确认
    pending: BTreeSet<u64>,
    /// 等待再次投递
    redeliver: BTreeSet<u64>,
    /// 被退回的投递及其重新投递时间
    delayed: BTreeMap<u64, Instant>,
    active_subscriptions: usize,
}

impl GroupState {
    fn has_acknowledged(&self, offset: u64) -> bool {
        offset < self.next_offset
            && !self.pending.contains(&offset)
            && !self.redeliver.contains(&offset)
            && !self.delayed.contains_key(&offset)
    }

    /// Moves returned deliveries whose delay has elapsed into the redelivery set and
    /// returns the earliest remaining deadline.
    fn release_due(&mut self, now: Instant) -> Option<Instant> {
        let redeliver = &mut self.redeliver;
        self.delayed.retain(|offset, due| {
            if *due <= now {
                redeliver.insert(*offset);
                false
            } else {
                true
            }
        });
        self.delayed.values().min().copied()
    }

    fn unacknowledged(&self) -> usize {
        self.pending.len() + self.redeliver.len() + self.delayed.len()
    }
}

#[derive(Debug)]
struct LaneState {
    entries: VecDeque<LaneEntry>,
    base_offset: u64,
    next_offset: u64,
    groups: HashMap<String, GroupState>,
    published: watch::Sender<u64>,
}

impl LaneState {
    fn new() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            entries: VecDeque::new(),
            base_offset: 0,
            next_offset: 0,
            groups: HashMap::new(),
            published,
        }
    }

    fn entry(&self, offset: u64) -> Option<&LaneEntry> {
        let index = offset.checked_sub(self.base_offset)?;
        self.entries.get(usize::try_from(index).ok()?)
    }

    /// Drops the log prefix every consumer group has acknowledged.
    fn compact(&mut self) {
        if self.groups.is_empty() {
            return;
        }
        while let Some(front) = self.entries.front() {
            let offset = front.offset;
            if !self.groups.values().all(|g| g.has_acknowledged(offset)) {
                break;
            }
            self.entries.pop_front();
            self.base_offset = offset + 1;
        }
    }
}

enum NextDelivery {
    Ready(Delivery),
    WaitUntil(Instant),
    Idle,
}

type Lanes = Arc<Mutex<HashMap<String, LaneState>>>;

/// 内存通道基座
///
/// 适用于单进程部署和测试。延迟可见性使用 `tokio::time`，因此可以在暂停时钟下测试。
#[derive(Debug, Clone)]
pub struct InMemoryLaneSubstrate {
    lanes: Lanes,
    config: InMemoryLaneConfig,
}

impl Default for InMemoryLaneSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLaneSubstrate {
    pub fn new() -> Self {
        Self::with_config(InMemoryLaneConfig::default())
    }

    pub fn with_config(config: InMemoryLaneConfig) -> Self {
        info!("Creating in-memory lane substrate with config: {:?}", config);
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    fn lock(lanes: &Lanes) -> CourierResult<MutexGuard<'_, HashMap<String, LaneState>>> {
        lanes
            .lock()
            .map_err(|_| CourierError::lane_error("lane state lock poisoned"))
    }

    /// 获取通道统计信息
    pub fn lane_stats(&self) -> CourierResult<LaneStats> {
        let lanes = Self::lock(&self.lanes)?;
        let mut stats = LaneStats::default();
        for (name, lane) in lanes.iter() {
            let pending = lane.groups.values().map(GroupState::unacknowledged).sum();
            stats.total_lanes += 1;
            stats.total_messages += lane.entries.len();
            stats.lane_details.push(LaneDetail {
                name: name.clone(),
                depth: lane.entries.len(),
                pending,
                consumer_groups: lane.groups.len(),
            });
        }
        stats.lane_details.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    fn poll_next(lanes: &Lanes, lane: &str, group: &str) -> CourierResult<NextDelivery> {
        let now = Instant::now();
        let mut lanes = Self::lock(lanes)?;
        let state = lanes
            .entry(lane.to_string())
            .or_insert_with(LaneState::new);
        let base_offset = state.base_offset;
        let Some(group_state) = state.groups.get_mut(group) else {
            return Err(CourierError::lane_error(format!(
                "consumer group '{group}' is not subscribed to lane '{lane}'"
            )));
        };

        let next_returned = group_state.release_due(now);
        let offset = if let Some(offset) = group_state.redeliver.pop_first() {
            offset
        } else {
            if group_state.next_offset < base_offset {
                group_state.next_offset = base_offset;
            }
            group_state.next_offset
        };
        let is_redelivery = offset < group_state.next_offset;

        let Some(entry) = state.entry(offset) else {
            return Ok(next_returned.map_or(NextDelivery::Idle, NextDelivery::WaitUntil));
        };

        if !is_redelivery && entry.visible_at > now {
            let deadline = next_returned.map_or(entry.visible_at, |due| due.min(entry.visible_at));
            return Ok(NextDelivery::WaitUntil(deadline));
        }

        let delivery = Delivery {
            message: entry.message.clone(),
            lane: lane.to_string(),
            consumer_group: group.to_string(),
            offset,
        };
        if let Some(group_state) = state.groups.get_mut(group) {
            if !is_redelivery {
                group_state.next_offset = offset + 1;
            }
            group_state.pending.insert(offset);
        }
        Ok(NextDelivery::Ready(delivery))
    }
}

/// Releases the group's subscription when the stream is dropped.
struct SubscriptionGuard {
    lanes: Lanes,
    lane: String,
    group: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Ok(mut lanes) = self.lanes.lock() {
            if let Some(group) = lanes
                .get_mut(&self.lane)
                .and_then(|lane| lane.groups.get_mut(&self.group))
            {
                group.active_subscriptions = group.active_subscriptions.saturating_sub(1);
            }
        }
        debug!(lane = %self.lane, group = %self.group, "Subscription released");
    }
}

struct SubscriptionState {
    guard: SubscriptionGuard,
    published: watch::Receiver<u64>,
}

#[async_trait]
impl LaneSubstrate for InMemoryLaneSubstrate {
    async fn publish(
        &self,
        lane: &str,
        mut message: Message,
        visible_after: Option<Duration>,
    ) -> CourierResult<()> {
        let now = Instant::now();
        let visible_at = match visible_after {
            Some(delay) => now.checked_add(delay).unwrap_or(now + FAR_FUTURE),
            None => now,
        };

        let mut lanes = Self::lock(&self.lanes)?;
        let state = lanes
            .entry(lane.to_string())
            .or_insert_with(LaneState::new);

        let capacity = self.config.capacity_of(lane);
        if capacity > 0 && state.entries.len() >= capacity {
            warn!("Lane '{}' is full, message {} rejected", lane, message.id);
            return Err(CourierError::lane_error(format!(
                "lane '{lane}' reached its capacity of {capacity}"
            )));
        }

        message.lane = lane.to_string();
        let offset = state.next_offset;
        debug!(
            "Publishing message {} to lane '{}' at offset {} (delay: {:?})",
            message.id, lane, offset, visible_after
        );
        state.entries.push_back(LaneEntry {
            offset,
            message,
            visible_at,
        });
        state.next_offset += 1;
        state.published.send_modify(|version| *version += 1);
        Ok(())
    }

    async fn subscribe(&self, lane: &str, consumer_group: &str) -> CourierResult<MessageStream> {
        let published = {
            let mut lanes = Self::lock(&self.lanes)?;
            let state = lanes
                .entry(lane.to_string())
                .or_insert_with(LaneState::new);
            let base_offset = state.base_offset;
            let group = state
                .groups
                .entry(consumer_group.to_string())
                .or_insert_with(|| GroupState {
                    next_offset: base_offset,
                    ..Default::default()
                });

            if group.active_subscriptions == 0 && !group.pending.is_empty() {
                info!(
                    "Redelivering {} unacknowledged messages on lane '{}' to group '{}'",
                    group.pending.len(),
                    lane,
                    consumer_group
                );
                let pending = std::mem::take(&mut group.pending);
                group.redeliver.extend(pending);
            }
            group.active_subscriptions += 1;
            state.published.subscribe()
        };

        let subscription = SubscriptionState {
            guard: SubscriptionGuard {
                lanes: Arc::clone(&self.lanes),
                lane: lane.to_string(),
                group: consumer_group.to_string(),
            },
            published,
        };

        let stream = futures::stream::unfold(subscription, |mut subscription| async move {
            loop {
                // 先标记已读版本，再检查状态，避免丢失检查之后的发布通知
                subscription.published.borrow_and_update();
                let next = InMemoryLaneSubstrate::poll_next(
                    &subscription.guard.lanes,
                    &subscription.guard.lane,
                    &subscription.guard.group,
                );
                match next {
                    Ok(NextDelivery::Ready(delivery)) => return Some((delivery, subscription)),
                    Ok(NextDelivery::WaitUntil(deadline)) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(deadline) => {}
                            changed = subscription.published.changed() => {
                                if changed.is_err() {
                                    return None;
                                }
                            }
                        }
                    }
                    Ok(NextDelivery::Idle) => {
                        if subscription.published.changed().await.is_err() {
                            return None;
                        }
                    }
                    Err(e) => {
                        warn!("Lane subscription ended: {}", e);
                        return None;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, delivery: &Delivery) -> CourierResult<()> {
        let mut lanes = Self::lock(&self.lanes)?;
        let Some(state) = lanes.get_mut(&delivery.lane) else {
            return Err(CourierError::lane_error(format!(
                "Lane '{}' not found",
                delivery.lane
            )));
        };
        if let Some(group) = state.groups.get_mut(&delivery.consumer_group) {
            group.pending.remove(&delivery.offset);
            group.redeliver.remove(&delivery.offset);
            group.delayed.remove(&delivery.offset);
        }
        state.compact();
        debug!(
            "Acknowledged message {} on lane '{}' (offset {})",
            delivery.message.id, delivery.lane, delivery.offset
        );
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, redeliver_after: Duration) -> CourierResult<()> {
        let now = Instant::now();
        let due = now.checked_add(redeliver_after).unwrap_or(now + FAR_FUTURE);

        let mut lanes = Self::lock(&self.lanes)?;
        let Some(state) = lanes.get_mut(&delivery.lane) else {
            return Err(CourierError::lane_error(format!(
                "Lane '{}' not found",
                delivery.lane
            )));
        };
        let Some(group) = state.groups.get_mut(&delivery.consumer_group) else {
            return Err(CourierError::lane_error(format!(
                "consumer group '{}' is not subscribed to lane '{}'",
                delivery.consumer_group, delivery.lane
            )));
        };

        if group.pending.remove(&delivery.offset) {
            group.delayed.insert(delivery.offset, due);
            // 唤醒空闲的订阅者，让它们按新的到期时间等待
            state.published.send_modify(|version| *version += 1);
            debug!(
                "Returned message {} on lane '{}' (offset {}), redelivery in {:?}",
                delivery.message.id, delivery.lane, delivery.offset, redeliver_after
            );
        }
        Ok(())
    }

    async fn lane_depth(&self, lane: &str) -> CourierResult<usize> {
        let lanes = Self::lock(&self.lanes)?;
        Ok(lanes.get(lane).map(|state| state.entries.len()).unwrap_or(0))
    }

    async fn read_lane(&self, lane: &str) -> CourierResult<Vec<Message>> {
        let lanes = Self::lock(&self.lanes)?;
        Ok(lanes
            .get(lane)
            .map(|state| state.entries.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default())
    }
}

/// 通道统计信息
#[derive(Debug, Default)]
pub struct LaneStats {
    pub total_lanes: usize,
    pub total_messages: usize,
    pub lane_details: Vec<LaneDetail>,
}

#[derive(Debug)]
pub struct LaneDetail {
    pub name: String,
    /// 保留的消息数
    pub depth: usize,
    /// 所有消费组已投递未确认的消息数
    pub pending: usize,
    pub consumer_groups: usize,
}
