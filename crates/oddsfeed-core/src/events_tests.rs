//! Tests for notification delivery.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Forwards every notification to a channel the test reads from.
struct ChannelHandler {
    sender: mpsc::UnboundedSender<RecoveryEvent>,
}

#[async_trait]
impl RecoveryEventHandler for ChannelHandler {
    async fn handle(&self, event: RecoveryEvent) {
        let _ = self.sender.send(event);
    }
}

/// Tracks how many deliveries overlap.
#[derive(Default)]
struct SlowHandler {
    active: AtomicUsize,
    max_active: AtomicUsize,
    handled: AtomicUsize,
}

#[async_trait]
impl RecoveryEventHandler for SlowHandler {
    async fn handle(&self, _event: RecoveryEvent) {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
    }
}

fn initiated(producer: u32, request: u64) -> RecoveryEvent {
    RecoveryEvent::RecoveryInitiated(RecoveryInitiated {
        producer_id: ProducerId::new(producer),
        request_id: RequestId::new(request),
        after: None,
        event_id: None,
        message: String::new(),
    })
}

fn request_id(event: &RecoveryEvent) -> u64 {
    match event {
        RecoveryEvent::RecoveryInitiated(e) => e.request_id.as_u64(),
        other => panic!("Unexpected event {:?}", other),
    }
}

/// Verify one producer's notifications arrive in publish order.
#[tokio::test]
async fn test_notifications_delivered_in_order() {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let dispatcher = RecoveryEventDispatcher::new(Arc::new(ChannelHandler { sender }));

    for request in 1..=50 {
        dispatcher.publish(initiated(1, request));
    }

    for expected in 1..=50 {
        let event = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request_id(&event), expected);
    }
}

/// Verify deliveries for one producer never overlap.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_delivery_at_a_time_per_producer() {
    let handler = Arc::new(SlowHandler::default());
    let dispatcher = RecoveryEventDispatcher::new(handler.clone());

    let publishers: Vec<_> = (0..4)
        .map(|n| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for request in 0..5 {
                    dispatcher.publish(initiated(1, n * 10 + request));
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.handled.load(Ordering::SeqCst) < 20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_producers_have_independent_queues() {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let dispatcher = RecoveryEventDispatcher::new(Arc::new(ChannelHandler { sender }));

    dispatcher.publish(initiated(1, 1));
    dispatcher.publish(initiated(3, 2));

    let mut producers = Vec::new();
    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        producers.push(event.producer_id().as_u32());
    }
    producers.sort_unstable();

    assert_eq!(producers, vec![1, 3]);
    assert!(format!("{:?}", dispatcher).contains("queues: 2"));
}

#[test]
fn test_publish_without_runtime_does_not_panic() {
    let dispatcher = RecoveryEventDispatcher::disabled();

    dispatcher.publish(initiated(1, 1));
}

#[test]
fn test_recovery_initiated_success_flag() {
    let mut event = RecoveryInitiated {
        producer_id: ProducerId::new(1),
        request_id: RequestId::new(1),
        after: None,
        event_id: None,
        message: String::new(),
    };
    assert!(event.is_success());

    event.message = "HTTP 500".to_string();
    assert!(!event.is_success());
}
