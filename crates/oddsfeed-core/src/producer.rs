//! Feed producers and their recovery-related state.
//!
//! A [`Producer`] is shared (`Arc<Producer>`) between the registry, its
//! recovery manager, and the request issuer. Mutable fields are only written
//! by the owning manager while it holds its lock; readers elsewhere get
//! lock-free or short-lived snapshots that may be slightly stale.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::config::ProducerConfig;
use crate::status::ProducerRecoveryStatus;
use crate::{EventId, ProducerId, RequestId, Timestamp};

/// Id of the sentinel returned for producers the registry does not know.
pub const UNKNOWN_PRODUCER_ID: u32 = 99;

/// Kind of events a producer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerScope {
    Live,
    Prematch,
    Virtual,
}

impl fmt::Display for ProducerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Live => "live",
            Self::Prematch => "prematch",
            Self::Virtual => "virtual",
        };
        f.write_str(name)
    }
}

/// The last recovery request issued for a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryInfo {
    /// Lower boundary of the recovery; `None` for a full-odds recovery
    pub after: Option<Timestamp>,

    pub requested_at: Timestamp,

    pub request_id: RequestId,

    pub node_id: Option<i32>,

    /// HTTP status, when the API answered at all
    pub response_code: Option<u16>,

    /// Diagnostic message for failed requests
    pub response_message: Option<String>,

    pub successful: bool,
}

#[derive(Debug)]
struct PendingEventRecovery {
    event_id: EventId,
    requested_at: Timestamp,
}

#[derive(Debug, Default)]
struct ProducerState {
    last_timestamp_before_disconnect: Option<Timestamp>,
    recovery_info: Option<RecoveryInfo>,
    event_recoveries: HashMap<RequestId, PendingEventRecovery>,
}

/// A feed producer.
#[derive(Debug)]
pub struct Producer {
    id: ProducerId,
    name: String,
    description: String,
    api_url: String,
    scope: ProducerScope,
    max_after_age: Duration,

    disabled: AtomicBool,
    available: AtomicBool,
    ignore_recovery: AtomicBool,
    down: AtomicBool,

    state: RwLock<ProducerState>,
}

impl Producer {
    /// Create an enabled, available producer.
    ///
    /// The producer starts down; only a completed recovery brings it up.
    pub fn new(
        id: ProducerId,
        name: impl Into<String>,
        api_url: impl Into<String>,
        scope: ProducerScope,
        max_after_age: Duration,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            api_url: api_url.into(),
            scope,
            max_after_age,
            disabled: AtomicBool::new(false),
            available: AtomicBool::new(true),
            ignore_recovery: AtomicBool::new(false),
            down: AtomicBool::new(true),
            state: RwLock::new(ProducerState::default()),
        }
    }

    pub fn from_config(config: &ProducerConfig) -> Self {
        let mut producer = Self::new(
            config.id,
            config.name.clone(),
            config.api_url.clone(),
            config.scope,
            config.max_after_age(),
        );
        producer.description = config.description.clone();
        producer.available = AtomicBool::new(config.active);
        producer
    }

    /// Sentinel for producers the registry does not know.
    pub fn unknown() -> Self {
        let producer = Self::new(
            ProducerId::new(UNKNOWN_PRODUCER_ID),
            "Unknown",
            "",
            ProducerScope::Live,
            Duration::ZERO,
        );
        producer.available.store(false, Ordering::Relaxed);
        producer.disabled.store(true, Ordering::Relaxed);
        producer
    }

    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Base URL of the producer's control API.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn scope(&self) -> ProducerScope {
        self.scope
    }

    /// How far back a recovery may reach.
    pub fn max_after_age(&self) -> Duration {
        self.max_after_age
    }

    /// Oldest "after" boundary the API accepts at `now`.
    pub fn oldest_allowed_after(&self, now: Timestamp) -> Timestamp {
        now.subtract_duration(self.max_after_age)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Whether the producer is enabled and offered by the API.
    pub fn is_active(&self) -> bool {
        self.is_available() && !self.is_disabled()
    }

    /// Replay mode: recovery is never attempted.
    pub fn ignore_recovery(&self) -> bool {
        self.ignore_recovery.load(Ordering::Acquire)
    }

    /// `true` whenever the recovery status is anything but `Completed`.
    pub fn is_producer_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    /// Last point in time up to which all messages are known to be processed.
    pub fn last_timestamp_before_disconnect(&self) -> Option<Timestamp> {
        self.read_state().last_timestamp_before_disconnect
    }

    pub fn recovery_info(&self) -> Option<RecoveryInfo> {
        self.read_state().recovery_info.clone()
    }

    /// Event-scoped recoveries awaiting their `snapshot_complete`.
    pub fn event_recoveries(&self) -> HashMap<RequestId, EventId> {
        self.read_state()
            .event_recoveries
            .iter()
            .map(|(request_id, pending)| (*request_id, pending.event_id.clone()))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Mutation, restricted to the registry, issuer, and manager
    // ------------------------------------------------------------------------

    pub(crate) fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    pub(crate) fn set_ignore_recovery(&self, ignore: bool) {
        self.ignore_recovery.store(ignore, Ordering::Release);
    }

    /// Derive the down flag from a status; the only writer of that flag.
    pub(crate) fn apply_status(&self, status: ProducerRecoveryStatus) {
        self.down.store(!status.is_up(), Ordering::Release);
    }

    pub(crate) fn set_last_timestamp_before_disconnect(&self, timestamp: Option<Timestamp>) {
        self.write_state().last_timestamp_before_disconnect = timestamp;
    }

    /// Move the last-good timestamp forward; never backwards.
    pub(crate) fn advance_last_timestamp_before_disconnect(&self, timestamp: Timestamp) {
        let mut state = self.write_state();
        match state.last_timestamp_before_disconnect {
            Some(current) if current >= timestamp => {}
            _ => state.last_timestamp_before_disconnect = Some(timestamp),
        }
    }

    pub(crate) fn set_recovery_info(&self, info: RecoveryInfo) {
        self.write_state().recovery_info = Some(info);
    }

    pub(crate) fn register_event_recovery(
        &self,
        request_id: RequestId,
        event_id: EventId,
        requested_at: Timestamp,
    ) {
        self.write_state().event_recoveries.insert(
            request_id,
            PendingEventRecovery {
                event_id,
                requested_at,
            },
        );
    }

    pub(crate) fn take_event_recovery(&self, request_id: RequestId) -> Option<EventId> {
        self.write_state()
            .event_recoveries
            .remove(&request_id)
            .map(|pending| pending.event_id)
    }

    /// Drop event recoveries requested before `cutoff`; returns what was dropped.
    pub(crate) fn expire_event_recoveries(&self, cutoff: Timestamp) -> Vec<(RequestId, EventId)> {
        let mut state = self.write_state();
        let expired: Vec<RequestId> = state
            .event_recoveries
            .iter()
            .filter(|(_, pending)| pending.requested_at < cutoff)
            .map(|(request_id, _)| *request_id)
            .collect();
        expired
            .into_iter()
            .filter_map(|request_id| {
                state
                    .event_recoveries
                    .remove(&request_id)
                    .map(|pending| (request_id, pending.event_id))
            })
            .collect()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ProducerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ProducerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.name)
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;
