// SPDX-FileCopyrightText: 2026 Outpost Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the queue processor against a real SQLite store.

use std::time::Duration;

use chrono::Utc;
use outpost_core::{JobStatus, JobStore, Priority};
use outpost_queue::{ConfigUpdate, QueueEvent};
use outpost_test_utils::{TestHarness, ValidationOutcome};

const ALICE: &str = "081234567890";
const ALICE_CHAT: &str = "6281234567890@c.us";

#[tokio::test]
async fn tick_delivers_ready_job() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "hello there").await.unwrap();
    assert_eq!(receipt.status, JobStatus::Waiting);

    let dispatched = h.processor.tick().await.unwrap();
    assert_eq!(dispatched, 1);
    h.settle().await.unwrap();

    let job = h.job(&receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.attempts, 0);

    let result = job.result.expect("completed job carries a result");
    assert_eq!(result["success"], true);
    assert_eq!(result["messageId"], receipt.message_id.as_str());
    assert_eq!(result["sentMessageId"], "mock-msg-1");
    assert_eq!(result["to"], "6281234567890");
    assert!(result["timestamp"].is_string());

    let sent = h.channel.sent_messages().await;
    assert_eq!(sent, vec![(ALICE_CHAT.to_string(), "hello there".to_string())]);
}

#[tokio::test]
async fn transient_send_error_reschedules_with_backoff() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "retry me").await.unwrap();
    h.channel
        .script_send(Err("Protocol error (Runtime.callFunctionOn): Session closed."))
        .await;

    let before = Utc::now();
    h.processor.tick().await.unwrap();
    h.settle().await.unwrap();

    let job = h.job(&receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 1);
    assert!(job.next_retry > before);
    assert!(job.last_error.unwrap().contains("Session closed"));

    // Not eligible again until the backoff elapses.
    assert_eq!(h.processor.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn exhausted_attempts_fail_the_job() {
    let h = TestHarness::builder().with_max_attempts(1).build().await.unwrap();
    let receipt = h.submit(ALICE, "last chance").await.unwrap();
    h.channel.script_send(Err("net::ERR_CONNECTION_RESET")).await;

    h.processor.tick().await.unwrap();
    h.settle().await.unwrap();

    let job = h.job(&receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.failed_reason.unwrap().contains("ERR_CONNECTION_RESET"));
    assert!(job.failed_at.is_some());
}

#[tokio::test]
async fn unregistered_recipient_fails_immediately() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "nobody home").await.unwrap();
    h.channel
        .script_validation(ALICE_CHAT, ValidationOutcome::NotRegistered)
        .await;

    h.processor.tick().await.unwrap();
    h.settle().await.unwrap();

    let job = h.job(&receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 5);
    assert!(job.failed_reason.unwrap().contains("not registered"));
    assert_eq!(h.channel.sent_count().await, 0);
}

#[tokio::test]
async fn validation_rejection_message_is_permanent() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "x").await.unwrap();
    h.channel
        .script_validation(ALICE_CHAT, ValidationOutcome::Error("invalid wid".into()))
        .await;

    h.processor.tick().await.unwrap();
    h.settle().await.unwrap();

    assert_eq!(h.job(&receipt.job_id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn other_validation_errors_are_retried() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "x").await.unwrap();
    // Matches the permanent "blocked" signature, but validation errors that
    // are not recipient rejections are always retried.
    h.channel
        .script_validation(ALICE_CHAT, ValidationOutcome::Error("request blocked by proxy".into()))
        .await;

    h.processor.tick().await.unwrap();
    h.settle().await.unwrap();

    let job = h.job(&receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn permanent_send_error_skips_retries() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "x").await.unwrap();
    h.channel.script_send(Err("Blocked by recipient")).await;

    h.processor.tick().await.unwrap();
    h.settle().await.unwrap();

    let job = h.job(&receipt.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn tick_skipped_while_channel_not_ready() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "wait for me").await.unwrap();
    h.channel.set_ready(false);

    assert_eq!(h.processor.tick().await.unwrap(), 0);
    assert_eq!(h.job(&receipt.job_id).await.unwrap().status, JobStatus::Waiting);
}

#[tokio::test]
async fn in_flight_jobs_bound_concurrency() {
    let h = TestHarness::builder().with_max_concurrent(2).build().await.unwrap();
    h.channel.set_send_delay(Duration::from_millis(300)).await;
    for i in 0..5 {
        h.submit(&format!("08123456780{i}"), "burst").await.unwrap();
    }

    assert_eq!(h.processor.tick().await.unwrap(), 2);
    assert_eq!(h.processor.in_flight_count(), 2);
    // All slots busy: an overlapping tick claims nothing.
    assert_eq!(h.processor.tick().await.unwrap(), 0);
    assert_eq!(h.store.stats().await.unwrap().active, 2);

    h.settle().await.unwrap();
    assert_eq!(h.processor.tick().await.unwrap(), 2);
    h.settle().await.unwrap();
    assert_eq!(h.processor.tick().await.unwrap(), 1);
    h.settle().await.unwrap();

    assert_eq!(h.channel.sent_count().await, 5);
    assert!(h.channel.max_concurrent_sends() <= 2);
    assert_eq!(h.store.stats().await.unwrap().completed, 5);
}

#[tokio::test]
async fn higher_priority_is_sent_first() {
    let h = TestHarness::builder().with_max_concurrent(1).build().await.unwrap();
    h.submit_with("081111111111", "low", Priority::Low).await.unwrap();
    h.submit_with("082222222222", "normal", Priority::Normal).await.unwrap();
    h.submit_with("083333333333", "high", Priority::High).await.unwrap();

    for _ in 0..3 {
        h.processor.tick().await.unwrap();
        h.settle().await.unwrap();
    }

    let bodies: Vec<String> = h
        .channel
        .sent_messages()
        .await
        .into_iter()
        .map(|(_, body)| body)
        .collect();
    assert_eq!(bodies, vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn start_is_idempotent_and_resume_restarts() {
    let h = TestHarness::builder().build().await.unwrap();
    let mut events = h.processor.subscribe();

    assert!(h.processor.start().await);
    assert!(h.processor.is_processing());
    assert!(!h.processor.start().await);
    assert!(!h.processor.resume().await);
    assert!(h.processor.is_processing());

    assert!(h.processor.stop().await);
    assert!(!h.processor.is_processing());
    assert!(!h.processor.stop().await);

    assert!(h.processor.resume().await);
    assert!(h.processor.is_processing());
    h.processor.stop().await;

    assert_eq!(events.recv().await.unwrap(), QueueEvent::Started);
    assert_eq!(events.recv().await.unwrap(), QueueEvent::Stopped);
    assert_eq!(events.recv().await.unwrap(), QueueEvent::Resumed);
    assert_eq!(events.recv().await.unwrap(), QueueEvent::Stopped);
}

#[tokio::test]
async fn start_ticks_immediately() {
    let h = TestHarness::builder().build().await.unwrap();
    let receipt = h.submit(ALICE, "right away").await.unwrap();

    h.processor.start().await;
    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.job(&receipt.job_id).await.unwrap().status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    h.processor.stop().await;
    assert!(delivered.is_ok(), "first tick should not wait for the interval");
}

#[tokio::test]
async fn stop_waits_for_in_flight_sends() {
    let h = TestHarness::builder().build().await.unwrap();
    h.channel.set_send_delay(Duration::from_millis(200)).await;
    let receipt = h.submit(ALICE, "slow").await.unwrap();

    h.processor.tick().await.unwrap();
    assert_eq!(h.processor.in_flight_count(), 1);

    h.processor.start().await;
    h.processor.stop().await;

    assert_eq!(h.processor.in_flight_count(), 0);
    assert_eq!(h.job(&receipt.job_id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn update_config_validates_before_applying() {
    let h = TestHarness::builder().build().await.unwrap();
    let mut events = h.processor.subscribe();

    let rejected = h.processor.update_config(&ConfigUpdate {
        max_concurrent: Some(0),
        process_interval_ms: Some(2_500),
        stalled_timeout_ms: None,
    });
    assert!(rejected.is_err());
    assert_eq!(h.processor.config().max_concurrent, 3);
    assert_eq!(h.processor.config().process_interval_ms, 5_000);

    let applied = h
        .processor
        .update_config(&ConfigUpdate {
            max_concurrent: Some(7),
            process_interval_ms: None,
            stalled_timeout_ms: Some(120_000),
        })
        .unwrap();
    assert_eq!(applied.max_concurrent, 7);
    assert_eq!(applied.stalled_timeout_ms, 120_000);

    let stats = h.processor.stats().await.unwrap();
    assert_eq!(stats.max_concurrent, 7);
    assert_eq!(stats.stalled_timeout_ms, 120_000);
    assert_eq!(
        events.recv().await.unwrap(),
        QueueEvent::ConfigUpdated {
            max_concurrent: 7,
            process_interval_ms: 5_000,
            stalled_timeout_ms: 120_000,
        }
    );
}

#[tokio::test]
async fn process_now_reports_stats() {
    let h = TestHarness::builder().build().await.unwrap();
    h.submit(ALICE, "now").await.unwrap();

    let stats = h.processor.process_now().await.unwrap();
    assert!(!stats.is_processing);
    assert_eq!(stats.max_concurrent, 3);
    assert_eq!(stats.queue_stats.total, 1);

    h.settle().await.unwrap();
    assert_eq!(h.processor.stats().await.unwrap().queue_stats.completed, 1);
}
