//! Recovery notifications and their delivery.
//!
//! Notifications are raised by the recovery managers and the request issuer
//! while they hold a producer's lock, but are delivered outside of it: every
//! producer gets its own queue drained by exactly one worker task. Handlers
//! therefore never run concurrently for the same producer, observe that
//! producer's notifications in the order they were raised, and can never
//! block message ingestion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::status::{ProducerRecoveryStatus, StatusChangeReason};
use crate::{EventId, ProducerId, RequestId, Timestamp};

/// A producer's recovery status changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub producer_id: ProducerId,
    /// Recovery request behind the change, if any
    pub request_id: Option<RequestId>,
    pub old_status: ProducerRecoveryStatus,
    pub new_status: ProducerRecoveryStatus,
    pub reason: StatusChangeReason,
    pub timestamp: Timestamp,
}

/// An event-scoped recovery finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecoveryCompleted {
    pub producer_id: ProducerId,
    pub request_id: RequestId,
    pub event_id: EventId,
}

/// A recovery request was sent, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryInitiated {
    pub producer_id: ProducerId,
    pub request_id: RequestId,
    pub after: Option<Timestamp>,
    pub event_id: Option<EventId>,
    /// Empty on success, a diagnostic on failure
    pub message: String,
}

impl RecoveryInitiated {
    pub fn is_success(&self) -> bool {
        self.message.is_empty()
    }
}

/// Any recovery notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    StatusChanged(StatusChange),
    EventRecoveryCompleted(EventRecoveryCompleted),
    RecoveryInitiated(RecoveryInitiated),
}

impl RecoveryEvent {
    pub fn producer_id(&self) -> ProducerId {
        match self {
            Self::StatusChanged(e) => e.producer_id,
            Self::EventRecoveryCompleted(e) => e.producer_id,
            Self::RecoveryInitiated(e) => e.producer_id,
        }
    }
}

/// Receives recovery notifications.
///
/// Implementations are called from a background task, one notification at a
/// time per producer.
#[async_trait]
pub trait RecoveryEventHandler: Send + Sync {
    async fn handle(&self, event: RecoveryEvent);
}

/// Handler that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRecoveryEventHandler;

#[async_trait]
impl RecoveryEventHandler for NoOpRecoveryEventHandler {
    async fn handle(&self, _event: RecoveryEvent) {}
}

/// Delivers notifications through per-producer queues.
///
/// Cheap to clone; clones share the queues.
#[derive(Clone)]
pub struct RecoveryEventDispatcher {
    handler: Arc<dyn RecoveryEventHandler>,
    queues: Arc<Mutex<HashMap<ProducerId, mpsc::UnboundedSender<RecoveryEvent>>>>,
}

impl fmt::Debug for RecoveryEventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.queues.lock().map(|q| q.len()).unwrap_or_default();
        f.debug_struct("RecoveryEventDispatcher")
            .field("queues", &queues)
            .finish()
    }
}

impl RecoveryEventDispatcher {
    pub fn new(handler: Arc<dyn RecoveryEventHandler>) -> Self {
        Self {
            handler,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatcher whose notifications go nowhere.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoOpRecoveryEventHandler))
    }

    /// Queue a notification for delivery. Never blocks.
    ///
    /// The producer's worker is started on first use and restarted if it died.
    /// Outside a Tokio runtime the notification is logged and dropped.
    pub fn publish(&self, event: RecoveryEvent) {
        let producer_id = event.producer_id();
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());

        let event = match queues.get(&producer_id) {
            Some(sender) => match sender.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => {
                    warn!(producer_id = %producer_id, "Notification worker stopped; restarting it");
                    event
                }
            },
            None => event,
        };

        match self.spawn_worker(producer_id) {
            Some(sender) => {
                // A fresh receiver is alive, so this cannot fail
                let _ = sender.send(event);
                queues.insert(producer_id, sender);
            }
            None => {
                queues.remove(&producer_id);
                warn!(
                    producer_id = %producer_id,
                    event = ?event,
                    "No async runtime available; dropping notification"
                );
            }
        }
    }

    fn spawn_worker(&self, producer_id: ProducerId) -> Option<mpsc::UnboundedSender<RecoveryEvent>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<RecoveryEvent>();
        let handler = Arc::clone(&self.handler);

        runtime.spawn(async move {
            debug!(producer_id = %producer_id, "Notification worker started");
            while let Some(event) = receiver.recv().await {
                handler.handle(event).await;
            }
        });

        Some(sender)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
