//! Integration tests for the first recovery of a producer
//!
//! A fresh producer waits for the first system heartbeat, recovers, and
//! becomes available once every session confirmed the recovery.

mod common;

use common::{all_session, live_session, query_param, t0, TestFeed, LIVE_ODDS};
use oddsfeed_core::{ProducerRecoveryStatus, RecoveryEvent, RequestId, StatusChangeReason};
use std::time::Duration;

/// Verify the first heartbeat starts a full recovery
#[tokio::test]
async fn test_first_heartbeat_starts_full_recovery() {
    // Arrange
    let mut feed = TestFeed::start().await;
    assert_eq!(feed.status(), ProducerRecoveryStatus::NotStarted);

    // Act
    feed.system_alive(t0()).await;

    // Assert
    assert_eq!(feed.status(), ProducerRecoveryStatus::Started);

    let requests = feed.recovery_requests().await;
    assert_eq!(requests.len(), 1, "Exactly one recovery request expected");
    assert_eq!(query_param(&requests[0], "after"), None);
    assert_eq!(query_param(&requests[0], "request_id"), Some("1".to_string()));

    match feed.next_event().await {
        RecoveryEvent::RecoveryInitiated(initiated) => {
            assert_eq!(initiated.producer_id, LIVE_ODDS);
            assert_eq!(initiated.request_id, RequestId::new(1));
            assert!(initiated.after.is_none());
            assert!(initiated.is_success());
        }
        other => panic!("Expected RecoveryInitiated, got {:?}", other),
    }

    let change = feed.next_status_change().await;
    assert_eq!(change.old_status, ProducerRecoveryStatus::NotStarted);
    assert_eq!(change.new_status, ProducerRecoveryStatus::Started);
    assert_eq!(change.reason, StatusChangeReason::RecoveryStarted);
    assert_eq!(change.request_id, Some(RequestId::new(1)));
}

/// Verify repeated heartbeats while recovering never issue another request
#[tokio::test]
async fn test_heartbeats_while_recovering_are_single_flight() {
    let feed = TestFeed::start().await;
    feed.system_alive(t0()).await;

    for i in 1..=5 {
        feed.advance(Duration::from_secs(10));
        feed.system_alive(t0().add_duration(Duration::from_secs(10 * i)))
            .await;
    }

    assert_eq!(feed.recovery_requests().await.len(), 1);
    assert_eq!(feed.status(), ProducerRecoveryStatus::Started);
}

/// Verify the recovery completes only once both sessions confirmed
#[tokio::test]
async fn test_recovery_completes_after_all_sessions_confirm() {
    // Arrange
    let mut feed = TestFeed::start().await;
    feed.system_alive(t0()).await;
    let request_id = feed.running_request_id().await;
    feed.advance(Duration::from_secs(3));

    // Act: first session
    feed.snapshot_complete(&live_session(), request_id, t0())
        .await;

    // Assert: still recovering
    assert_eq!(feed.status(), ProducerRecoveryStatus::Started);

    // Act: second session
    feed.snapshot_complete(&all_session(), request_id, t0())
        .await;

    // Assert
    assert_eq!(feed.status(), ProducerRecoveryStatus::Completed);
    let producer = feed.coordinator.registry().get(LIVE_ODDS);
    assert!(!producer.is_producer_down());
    assert_eq!(producer.last_timestamp_before_disconnect(), Some(t0()));

    let started = feed.next_status_change().await;
    assert_eq!(started.new_status, ProducerRecoveryStatus::Started);

    let completed = feed.next_status_change().await;
    assert_eq!(completed.old_status, ProducerRecoveryStatus::Started);
    assert_eq!(completed.new_status, ProducerRecoveryStatus::Completed);
    assert_eq!(completed.reason, StatusChangeReason::FirstRecoveryCompleted);
    assert_eq!(completed.request_id, Some(request_id));
}

/// Verify confirmations for an unknown request leave the recovery running
#[tokio::test]
async fn test_confirmation_for_other_request_is_ignored() {
    let feed = TestFeed::start().await;
    feed.system_alive(t0()).await;

    feed.confirm_on_all_sessions(RequestId::new(4242), t0())
        .await;

    assert_eq!(feed.status(), ProducerRecoveryStatus::Started);
}

/// Verify the producer resumes from a configured timestamp
#[tokio::test]
async fn test_recovery_resumes_from_timestamp_before_disconnect() {
    // Arrange
    let server = wiremock::MockServer::start().await;
    common::mount_recovery_endpoint(&server).await;
    let config = common::feed_config(&server);
    let resume_from = t0().subtract_duration(Duration::from_secs(15 * 60));

    let feed = TestFeed::open_with(server, config, |feed| {
        feed.coordinator
            .registry()
            .add_timestamp_before_disconnect(LIVE_ODDS, resume_from)
            .expect("timestamp within the recovery window");
    });

    // Act
    feed.system_alive(t0()).await;

    // Assert
    let requests = feed.recovery_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        query_param(&requests[0], "after"),
        Some(resume_from.epoch_seconds().to_string())
    );
}

/// Verify the registry can no longer be changed once the feed is open
#[tokio::test]
async fn test_registry_locked_after_open() {
    let feed = TestFeed::start().await;

    let result = feed
        .coordinator
        .registry()
        .add_timestamp_before_disconnect(LIVE_ODDS, t0());

    assert_eq!(result, Err(oddsfeed_core::RegistryError::Locked));
}
