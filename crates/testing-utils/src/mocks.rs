//! Mock implementations for the handler, monitoring and lane traits
//!
//! All mocks are cheap to clone; clones share the recorded state so a test can keep
//! one handle while the pipeline owns another.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_domain::{
    CourierError, CourierResult, DeadLetterReason, Delivery, FailureKind, HandlerFailure,
    LaneSubstrate, Message, MessageHandler, MessageStream, MonitoringSink,
};
use courier_infrastructure::InMemoryLaneSubstrate;
use tokio::time::Instant;

/// One recorded handler invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub message_id: String,
    pub lane: String,
    pub attempt: u32,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(FailureKind),
    /// 前 n 次失败，之后成功
    FailTimes(usize, FailureKind),
    Panic,
}

/// Handler whose result is scripted up front and which records every call
#[derive(Debug, Clone)]
pub struct ScriptedHandler {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedHandler {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    pub fn always_failing(kind: FailureKind) -> Self {
        Self::with_behavior(Behavior::Fail(kind))
    }

    pub fn failing_times(times: usize, kind: FailureKind) -> Self {
        Self::with_behavior(Behavior::FailTimes(times, kind))
    }

    pub fn panicking() -> Self {
        Self::with_behavior(Behavior::Panic)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn lanes(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.lane).collect()
    }

    /// Time between consecutive invocations
    pub fn gaps(&self) -> Vec<Duration> {
        self.invocations()
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(Invocation {
            message_id: message.id.clone(),
            lane: message.lane.clone(),
            attempt: message.attempt,
            at: Instant::now(),
        });

        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(kind) => Err(HandlerFailure::new(*kind, "scripted failure")),
            Behavior::FailTimes(times, kind) if call < *times => {
                Err(HandlerFailure::new(*kind, format!("scripted failure #{}", call + 1)))
            }
            Behavior::FailTimes(..) => Ok(()),
            Behavior::Panic => panic!("scripted handler panic"),
        }
    }
}

/// Monitoring sink that records dead letters and can fail a scripted number of times
#[derive(Debug, Clone, Default)]
pub struct RecordingMonitoringSink {
    failures_remaining: Arc<AtomicUsize>,
    always_fail: bool,
    calls: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<(Message, DeadLetterReason)>>>,
}

impl RecordingMonitoringSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(times: usize) -> Self {
        Self {
            failures_remaining: Arc::new(AtomicUsize::new(times)),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    /// Total calls, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Dead letters accepted without failure
    pub fn received(&self) -> Vec<(Message, DeadLetterReason)> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitoringSink for RecordingMonitoringSink {
    async fn on_dead_letter(
        &self,
        message: &Message,
        reason: DeadLetterReason,
    ) -> Result<(), HandlerFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(HandlerFailure::runtime("monitoring store unavailable"));
        }
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerFailure::runtime("monitoring store unavailable"));
        }
        self.received.lock().unwrap().push((message.clone(), reason));
        Ok(())
    }
}

/// In-memory substrate whose publishes to selected lanes can be made to fail
#[derive(Debug, Clone, Default)]
pub struct FlakyLaneSubstrate {
    inner: InMemoryLaneSubstrate,
    failing_lanes: Arc<Mutex<HashSet<String>>>,
}

impl FlakyLaneSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryLaneSubstrate {
        &self.inner
    }

    pub fn fail_publishes_to(&self, lane: &str) {
        self.failing_lanes.lock().unwrap().insert(lane.to_string());
    }

    pub fn heal(&self) {
        self.failing_lanes.lock().unwrap().clear();
    }
}

#[async_trait]
impl LaneSubstrate for FlakyLaneSubstrate {
    async fn publish(
        &self,
        lane: &str,
        message: Message,
        visible_after: Option<Duration>,
    ) -> CourierResult<()> {
        if self.failing_lanes.lock().unwrap().contains(lane) {
            return Err(CourierError::lane_error(format!(
                "injected publish failure on lane '{lane}'"
            )));
        }
        self.inner.publish(lane, message, visible_after).await
    }

    async fn subscribe(&self, lane: &str, consumer_group: &str) -> CourierResult<MessageStream> {
        self.inner.subscribe(lane, consumer_group).await
    }

    async fn ack(&self, delivery: &Delivery) -> CourierResult<()> {
        self.inner.ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery, redeliver_after: Duration) -> CourierResult<()> {
        self.inner.nack(delivery, redeliver_after).await
    }

    async fn lane_depth(&self, lane: &str) -> CourierResult<usize> {
        self.inner.lane_depth(lane).await
    }

    async fn read_lane(&self, lane: &str) -> CourierResult<Vec<Message>> {
        self.inner.read_lane(lane).await
    }
}
