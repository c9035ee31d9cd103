//! Integration tests for recoveries the control API can never serve
//!
//! A producer whose last good timestamp fell out of its recovery window (or
//! lies in the future) cannot be recovered. The producer stops for good and
//! the coordinator closes without contacting the API.

mod common;

use common::{feed_config, t0, TestFeed, LIVE_ODDS, RECOVERY_PATH};
use oddsfeed_core::{AliveMessage, ProducerRecoveryStatus, RecoveryError, StatusChangeReason};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Server that fails the test on drop if any recovery request arrives.
async fn server_expecting_no_recovery() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RECOVERY_PATH))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;
    server
}

/// Verify a boundary beyond the recovery window is fatal and never retried
#[tokio::test]
async fn test_expired_boundary_is_fatal() {
    // Arrange: 60 minute window, resume 50 minutes back, then 20 minutes pass
    let server = server_expecting_no_recovery().await;
    let config = feed_config(&server);
    let mut feed = TestFeed::open_with(server, config, |feed| {
        feed.coordinator
            .registry()
            .add_timestamp_before_disconnect(
                LIVE_ODDS,
                t0().subtract_duration(Duration::from_secs(50 * 60)),
            )
            .expect("timestamp within the recovery window");
    });
    feed.advance(Duration::from_secs(20 * 60));

    // Act
    let result = feed
        .coordinator
        .process_system_message(&AliveMessage::new(LIVE_ODDS, feed.now(), true))
        .await;

    // Assert
    match result {
        Err(RecoveryError::Fatal { producer_id, .. }) => assert_eq!(producer_id, LIVE_ODDS),
        other => panic!("Expected fatal error, got {:?}", other),
    }
    assert_eq!(feed.status(), ProducerRecoveryStatus::FatalError);
    assert!(feed.coordinator.is_closed());

    let change = feed.next_status_change().await;
    assert_eq!(change.new_status, ProducerRecoveryStatus::FatalError);
    assert_eq!(change.reason, StatusChangeReason::FatalLookback);

    // Act: nothing afterwards reaches the API
    feed.advance(Duration::from_secs(120));
    feed.coordinator
        .process_system_message(&AliveMessage::new(LIVE_ODDS, feed.now(), true))
        .await
        .expect("messages after close are dropped");
    feed.poll().await;

    // Assert
    assert_eq!(feed.status(), ProducerRecoveryStatus::FatalError);
    assert!(feed.recovery_requests().await.is_empty());
}

/// Verify a boundary in the future is fatal as well
#[tokio::test]
async fn test_future_boundary_is_fatal() {
    let server = server_expecting_no_recovery().await;
    let config = feed_config(&server);
    let feed = TestFeed::open_with(server, config, |feed| {
        feed.coordinator
            .registry()
            .add_timestamp_before_disconnect(LIVE_ODDS, t0().add_duration(Duration::from_secs(600)))
            .expect("future timestamps are accepted by the registry");
    });

    let result = feed.coordinator.check_status().await;
    assert!(result.is_ok(), "Nothing is attempted before a heartbeat");

    let result = feed
        .coordinator
        .process_system_message(&AliveMessage::new(LIVE_ODDS, t0(), true))
        .await;

    assert!(matches!(result, Err(RecoveryError::Fatal { .. })));
    assert!(feed.coordinator.is_closed());
}

/// Verify a boundary older than the window is refused before opening
#[tokio::test]
async fn test_registry_rejects_expired_timestamp() {
    let server = MockServer::start().await;
    let config = feed_config(&server);

    TestFeed::open_with(server, config, |feed| {
        let result = feed.coordinator.registry().add_timestamp_before_disconnect(
            LIVE_ODDS,
            t0().subtract_duration(Duration::from_secs(61 * 60)),
        );
        assert!(matches!(
            result,
            Err(oddsfeed_core::RegistryError::TimestampTooOld { .. })
        ));
    });
}
