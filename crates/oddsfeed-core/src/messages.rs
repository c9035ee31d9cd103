//! Feed messages as seen by the recovery layer.
//!
//! Only the fields recovery decisions depend on are modelled here; the full
//! sport-event payloads are mapped elsewhere and reduced to a [`DataMessage`]
//! before they reach this crate.

use serde::{Deserialize, Serialize};

use crate::{EventId, ProducerId, RequestId, Timestamp};

/// Producer heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveMessage {
    pub producer_id: ProducerId,
    /// Generation time on the producer side.
    pub timestamp: Timestamp,
    /// `false` when the session temporarily stopped propagating this producer.
    pub subscribed: bool,
}

impl AliveMessage {
    pub fn new(producer_id: ProducerId, timestamp: Timestamp, subscribed: bool) -> Self {
        Self {
            producer_id,
            timestamp,
            subscribed,
        }
    }
}

/// Signals that re-delivery for a recovery request finished on one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCompleteMessage {
    pub producer_id: ProducerId,
    pub request_id: RequestId,
    pub timestamp: Timestamp,
}

impl SnapshotCompleteMessage {
    pub fn new(producer_id: ProducerId, request_id: RequestId, timestamp: Timestamp) -> Self {
        Self {
            producer_id,
            request_id,
            timestamp,
        }
    }
}

/// Kind of a sport-event data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    OddsChange,
    BetStop,
    BetSettlement,
    RollbackBetSettlement,
    BetCancel,
    RollbackBetCancel,
    FixtureChange,
}

/// Any non-control feed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub producer_id: ProducerId,
    pub kind: MessageKind,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub event_id: Option<EventId>,
    /// Set when the message is re-delivered as part of a recovery.
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

impl DataMessage {
    pub fn new(producer_id: ProducerId, kind: MessageKind, timestamp: Timestamp) -> Self {
        Self {
            producer_id,
            kind,
            timestamp,
            event_id: None,
            request_id: None,
        }
    }

    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// A message received on one of the feed sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Alive(AliveMessage),
    SnapshotComplete(SnapshotCompleteMessage),
    Data(DataMessage),
}

impl FeedMessage {
    /// Producer the message belongs to.
    pub fn producer_id(&self) -> ProducerId {
        match self {
            Self::Alive(m) => m.producer_id,
            Self::SnapshotComplete(m) => m.producer_id,
            Self::Data(m) => m.producer_id,
        }
    }

    /// Producer-side generation time.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Alive(m) => m.timestamp,
            Self::SnapshotComplete(m) => m.timestamp,
            Self::Data(m) => m.timestamp,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alive(_) => "alive",
            Self::SnapshotComplete(_) => "snapshot_complete",
            Self::Data(_) => "data",
        }
    }
}

impl From<AliveMessage> for FeedMessage {
    fn from(message: AliveMessage) -> Self {
        Self::Alive(message)
    }
}

impl From<SnapshotCompleteMessage> for FeedMessage {
    fn from(message: SnapshotCompleteMessage) -> Self {
        Self::SnapshotComplete(message)
    }
}

impl From<DataMessage> for FeedMessage {
    fn from(message: DataMessage) -> Self {
        Self::Data(message)
    }
}
