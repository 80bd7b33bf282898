use std::sync::Arc;
use std::time::Duration;

use courier_config::{RetryPolicy, TerminalStrategy};
use courier_domain::{DeadLetterReason, FailureKind, HandlerFailure, LaneSubstrate};
use courier_infrastructure::InMemoryLaneSubstrate;
use courier_testing_utils::{MessageBuilder, RecordingMonitoringSink};

use courier_dispatcher::dead_letter::{DeadLetterOutcome, DeadLetterRouter};
use courier_dispatcher::retry_scheduler::{RetryPlan, RetryScheduler};

fn router(
    substrate: Arc<InMemoryLaneSubstrate>,
    sink: RecordingMonitoringSink,
) -> DeadLetterRouter {
    let scheduler = RetryScheduler::new(substrate.clone());
    DeadLetterRouter::new(substrate, Arc::new(sink), scheduler)
}

fn exhausted_message() -> courier_domain::Message {
    MessageBuilder::new("testEmail")
        .with_payload("user@example.com")
        .with_attempt(3)
        .with_last_failure(HandlerFailure::transient("smtp unavailable"))
        .build()
}

#[tokio::test]
async fn test_delivered_to_terminal_lane_and_monitored_once() {
    let substrate = Arc::new(InMemoryLaneSubstrate::new());
    let sink = RecordingMonitoringSink::new();
    let router = router(substrate.clone(), sink.clone());
    let message = exhausted_message();

    let outcome = router
        .route(&message, DeadLetterReason::AttemptsExhausted, &RetryPolicy::default())
        .await
        .unwrap();

    assert_eq!(outcome, DeadLetterOutcome::Delivered);
    let dlt = substrate.read_lane("testEmail-dlt").await.unwrap();
    assert_eq!(dlt.len(), 1);
    assert_eq!(dlt[0].id, message.id);
    assert_eq!(dlt[0].lane, "testEmail-dlt");
    assert_eq!(
        dlt[0].last_failure.as_ref().map(|f| f.kind),
        Some(FailureKind::Transient)
    );

    assert_eq!(sink.call_count(), 1);
    let received = sink.received();
    assert_eq!(received[0].0.id, message.id);
    assert_eq!(received[0].1, DeadLetterReason::AttemptsExhausted);
}

#[tokio::test]
async fn test_fail_on_dlt_error_drops_and_surfaces_failure() {
    let substrate = Arc::new(InMemoryLaneSubstrate::new());
    let sink = RecordingMonitoringSink::always_failing();
    let router = router(substrate.clone(), sink.clone());
    let policy = RetryPolicy::default().with_terminal_strategy(TerminalStrategy::FailOnDltError);

    let outcome = router
        .route(&exhausted_message(), DeadLetterReason::AttemptsExhausted, &policy)
        .await
        .unwrap();

    match outcome {
        DeadLetterOutcome::MonitoringFailed(failure) => {
            assert_eq!(failure.kind, FailureKind::Runtime)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(sink.call_count(), 1);
    // 没有重新提交到任何重试通道
    assert_eq!(substrate.lane_depth("testEmail-retry-3").await.unwrap(), 0);
}

#[tokio::test]
async fn test_always_retry_on_dlt_error_resubmits_to_final_tier() {
    let substrate = Arc::new(InMemoryLaneSubstrate::new());
    let sink = RecordingMonitoringSink::always_failing();
    let router = router(substrate.clone(), sink.clone());
    let policy =
        RetryPolicy::default().with_terminal_strategy(TerminalStrategy::AlwaysRetryOnDltError);
    let message = exhausted_message();

    let outcome = router
        .route(&message, DeadLetterReason::AttemptsExhausted, &policy)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DeadLetterOutcome::Resubmitted(RetryPlan {
            delay: Duration::from_secs(4),
            target_lane: "testEmail-retry-3".to_string(),
            next_attempt: 3,
        })
    );
    let resubmitted = substrate.read_lane("testEmail-retry-3").await.unwrap();
    assert_eq!(resubmitted.len(), 1);
    assert_eq!(resubmitted[0].id, message.id);
    assert_eq!(resubmitted[0].attempt, 3);
}

#[tokio::test]
async fn test_always_retry_with_single_attempt_resubmits_to_base_lane() {
    let substrate = Arc::new(InMemoryLaneSubstrate::new());
    let router = router(substrate.clone(), RecordingMonitoringSink::always_failing());
    let policy = RetryPolicy::default()
        .with_max_attempts(1)
        .with_terminal_strategy(TerminalStrategy::AlwaysRetryOnDltError);
    let message = MessageBuilder::new("testEmail").build();

    let outcome = router
        .route(&message, DeadLetterReason::AttemptsExhausted, &policy)
        .await
        .unwrap();

    match outcome {
        DeadLetterOutcome::Resubmitted(plan) => {
            assert_eq!(plan.target_lane, "testEmail");
            assert_eq!(plan.delay, Duration::from_secs(1));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_no_dead_letter_drops_silently() {
    let substrate = Arc::new(InMemoryLaneSubstrate::new());
    let sink = RecordingMonitoringSink::new();
    let router = router(substrate.clone(), sink.clone());
    let policy = RetryPolicy::default().with_terminal_strategy(TerminalStrategy::NoDeadLetter);

    let outcome = router
        .route(&exhausted_message(), DeadLetterReason::NonRetryable, &policy)
        .await
        .unwrap();

    assert_eq!(outcome, DeadLetterOutcome::Dropped);
    assert_eq!(substrate.lane_depth("testEmail-dlt").await.unwrap(), 0);
    assert_eq!(sink.call_count(), 0);
}
