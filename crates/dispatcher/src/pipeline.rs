//! # 消息流水线
//!
//! 每个监听器一个流水线实例。流水线以同一个消费组绑定基础通道和全部重试层级通道，
//! 每个通道由若干worker共享同一个订阅，按发布顺序取消息并调用处理器。
//!
//! 处理失败时：
//! - 失败类型不可重试：交给死信路由（`NonRetryable`）
//! - 尚有剩余尝试次数：交给重试调度器
//! - 尝试次数耗尽：交给死信路由（`AttemptsExhausted`）
//!
//! 路由本身失败（发布出错）时消息退回通道，经过 `initial_delay` 后在本进程内再次投递。
//! 处理器失败或panic都不会终止worker。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use courier_config::{ConfigValidator, ListenerConfig, RetryPolicy};
use courier_domain::lanes::listener_lanes;
use courier_domain::{
    AttemptRecord, CourierError, CourierResult, DeadLetterReason, Delivery, HandlerFailure,
    HandlerRegistry, LaneSubstrate, Message, MessageStream, MonitoringSink, RoutingDecision,
};
use courier_infrastructure::MetricsCollector;
use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::dead_letter::{DeadLetterOutcome, DeadLetterRouter};
use crate::retry_scheduler::RetryScheduler;

const ATTEMPT_RECORD_CAPACITY: usize = 1024;

struct PipelineContext {
    topic: String,
    policy: RetryPolicy,
    substrate: Arc<dyn LaneSubstrate>,
    registry: Arc<HandlerRegistry>,
    scheduler: RetryScheduler,
    router: DeadLetterRouter,
    records: broadcast::Sender<AttemptRecord>,
    metrics: MetricsCollector,
}

pub struct MessagePipeline {
    listener: ListenerConfig,
    context: Arc<PipelineContext>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessagePipeline {
    pub fn new(
        listener: ListenerConfig,
        substrate: Arc<dyn LaneSubstrate>,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn MonitoringSink>,
    ) -> CourierResult<Self> {
        listener.validate()?;

        let scheduler = RetryScheduler::new(substrate.clone());
        let router = DeadLetterRouter::new(substrate.clone(), sink, scheduler.clone());
        let (records, _) = broadcast::channel(ATTEMPT_RECORD_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);

        let context = PipelineContext {
            topic: listener.topic.clone(),
            policy: listener.retry.clone(),
            substrate,
            registry,
            scheduler,
            router,
            records,
            metrics: MetricsCollector::new(),
        };

        Ok(Self {
            listener,
            context: Arc::new(context),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn topic(&self) -> &str {
        &self.listener.topic
    }

    /// 基础通道加上每个重试层级通道
    pub fn lanes(&self) -> Vec<String> {
        listener_lanes(&self.listener.topic, self.listener.retry.max_attempts)
    }

    /// Subscribes to the attempt records of every failed attempt.
    pub fn observe(&self) -> broadcast::Receiver<AttemptRecord> {
        self.context.records.subscribe()
    }

    /// Binds every lane with the listener's consumer group and spawns its workers.
    #[instrument(skip(self), fields(topic = %self.listener.topic))]
    pub async fn start(&self) -> CourierResult<()> {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Err(CourierError::validation_error(format!(
                "监听器 {} 已经启动",
                self.listener.topic
            )));
        }

        let group = self.listener.group_name();
        for lane in self.lanes() {
            let worker_count = if lane == self.listener.topic {
                self.listener.concurrency
            } else {
                self.listener.retry_workers()
            };
            let stream = self.context.substrate.subscribe(&lane, &group).await?;
            let stream = Arc::new(Mutex::new(stream));

            for worker_index in 0..worker_count {
                let handle = tokio::spawn(run_worker(
                    self.context.clone(),
                    lane.clone(),
                    worker_index,
                    stream.clone(),
                    self.shutdown_tx.subscribe(),
                ));
                workers.push(handle);
            }
            debug!("通道 {} 启动了 {} 个worker", lane, worker_count);
        }

        info!(
            "监听器 {} 已启动，消费组: {}，通道数: {}，worker数: {}",
            self.listener.topic,
            group,
            self.lanes().len(),
            workers.len()
        );
        Ok(())
    }

    /// Signals every worker and waits for in-flight handlers to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker退出异常: {}", e);
            }
        }
        info!("监听器 {} 已停止", self.listener.topic);
    }
}

async fn run_worker(
    context: Arc<PipelineContext>,
    lane: String,
    worker_index: usize,
    stream: Arc<Mutex<MessageStream>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("worker {}#{} 开始消费", lane, worker_index);
    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            next = async { stream.lock().await.next().await } => match next {
                Some(delivery) => delivery,
                None => {
                    warn!("通道 {} 的订阅已结束", lane);
                    break;
                }
            },
        };
        context.process(delivery).await;
    }
    debug!("worker {}#{} 已退出", lane, worker_index);
}

impl PipelineContext {
    #[instrument(skip_all, fields(message_id = %delivery.message.id, lane = %delivery.lane, attempt = delivery.message.attempt))]
    async fn process(&self, delivery: Delivery) {
        let started = Instant::now();
        let message = &delivery.message;

        let result = AssertUnwindSafe(self.registry.dispatch(message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerFailure::runtime(format!(
                    "handler panicked: {}",
                    panic_message(&*panic)
                )))
            });

        match result {
            Ok(()) => {
                self.metrics
                    .record_handled(&self.topic, &delivery.lane, started.elapsed());
                debug!("消息处理成功");
                self.ack(&delivery).await;
            }
            Err(failure) => {
                self.metrics
                    .record_failed_attempt(&self.topic, &delivery.lane, failure.kind);
                warn!(kind = %failure.kind, "消息处理失败: {}", failure.reason);

                let decision = self.route_failure(message, &failure).await;
                let record = AttemptRecord {
                    message_id: message.id.clone(),
                    topic: message.topic.clone(),
                    lane: delivery.lane.clone(),
                    attempt: message.attempt + 1,
                    failure_kind: failure.kind,
                    decision: decision.clone(),
                    recorded_at: Utc::now(),
                };
                // 没有观察者时发送失败，可以忽略
                let _ = self.records.send(record);

                if decision == RoutingDecision::RoutingFailed {
                    self.nack(&delivery).await;
                } else {
                    self.ack(&delivery).await;
                }
            }
        }
    }

    async fn route_failure(&self, message: &Message, failure: &HandlerFailure) -> RoutingDecision {
        if !self.policy.is_retryable(failure.kind) {
            return self
                .dead_letter(message, failure, DeadLetterReason::NonRetryable)
                .await;
        }
        if message.is_attempts_exhausted(self.policy.max_attempts) {
            return self
                .dead_letter(message, failure, DeadLetterReason::AttemptsExhausted)
                .await;
        }

        match self.scheduler.schedule(message, &self.policy, failure).await {
            Ok(plan) => RoutingDecision::Retry {
                lane: plan.target_lane,
                delay: plan.delay,
            },
            Err(e) => {
                error!("消息 {} 重试调度失败，稍后重新投递: {}", message.id, e);
                self.metrics.record_routing_failure(&self.topic);
                RoutingDecision::RoutingFailed
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &Message,
        failure: &HandlerFailure,
        reason: DeadLetterReason,
    ) -> RoutingDecision {
        let mut exhausted = message.clone();
        exhausted.last_failure = Some(failure.clone());

        match self.router.route(&exhausted, reason, &self.policy).await {
            Ok(DeadLetterOutcome::Delivered) => RoutingDecision::DeadLettered { reason },
            Ok(DeadLetterOutcome::Dropped) | Ok(DeadLetterOutcome::MonitoringFailed(_)) => {
                RoutingDecision::Dropped { reason }
            }
            Ok(DeadLetterOutcome::Resubmitted(plan)) => RoutingDecision::Resubmitted {
                lane: plan.target_lane,
                delay: plan.delay,
            },
            Err(e) => {
                error!("消息 {} 死信路由失败，稍后重新投递: {}", message.id, e);
                self.metrics.record_routing_failure(&self.topic);
                RoutingDecision::RoutingFailed
            }
        }
    }

    async fn nack(&self, delivery: &Delivery) {
        let delay = self.policy.initial_delay;
        match self.substrate.nack(delivery, delay).await {
            Ok(()) => debug!("消息 {} 将在 {:?} 后重新投递", delivery.message.id, delay),
            // 退回失败时消息仍未确认，重新订阅后投递
            Err(e) => warn!("消息 {} 退回失败: {}", delivery.message.id, e),
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.substrate.ack(delivery).await {
            warn!("消息 {} 确认失败: {}", delivery.message.id, e);
            return;
        }
        if let Ok(depth) = self.substrate.lane_depth(&delivery.lane).await {
            self.metrics.update_lane_depth(&delivery.lane, depth);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
