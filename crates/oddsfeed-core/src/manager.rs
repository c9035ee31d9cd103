//! Per-producer recovery state machine.
//!
//! [`ProducerRecoveryManager`] decides, for one producer, whether the
//! consumer is caught up, behind, in need of a recovery, or unable to recover
//! at all. It is driven from three directions:
//!
//! - [`process_system_message`](ProducerRecoveryManager::process_system_message):
//!   heartbeats from the system session start and interrupt recoveries
//! - [`process_user_message`](ProducerRecoveryManager::process_user_message):
//!   user-session traffic feeds the liveness tracker and completes recoveries
//! - [`check_status`](ProducerRecoveryManager::check_status): a periodic poll
//!   re-evaluates time-based conditions nothing else drives
//!
//! All three, plus the connection hooks, serialize on one per-producer async
//! lock. Different producers never contend. The current status is mirrored
//! into an atomic so readers never wait for that lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::RecoverySettings;
use crate::error::RecoveryError;
use crate::events::{EventRecoveryCompleted, RecoveryEvent, RecoveryEventDispatcher, StatusChange};
use crate::issuer::RecoveryRequestIssuer;
use crate::liveness::LivenessTracker;
use crate::messages::{AliveMessage, FeedMessage, SnapshotCompleteMessage};
use crate::monitoring::MetricsCollector;
use crate::operation::{RecoveryOperation, RecoveryResult, StartOutcome};
use crate::producer::Producer;
use crate::status::{ProducerRecoveryStatus, StatusChangeReason};
use crate::{RequestId, SessionId, Timestamp};

/// State only touched while holding the manager's lock.
struct ManagerState {
    operation: RecoveryOperation,
    tracker: LivenessTracker,
    previous_system_alive: Option<AliveMessage>,
    has_completed_once: bool,
    fatal_reason: Option<String>,
}

/// Recovery state machine of one producer.
pub struct ProducerRecoveryManager {
    producer: Arc<Producer>,
    status: AtomicU8,
    state: Mutex<ManagerState>,
    settings: RecoverySettings,
    clock: Arc<dyn Clock>,
    events: RecoveryEventDispatcher,
    metrics: Arc<dyn MetricsCollector>,
}

impl fmt::Debug for ProducerRecoveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerRecoveryManager")
            .field("producer_id", &self.producer.id())
            .field("status", &self.status())
            .finish()
    }
}

impl ProducerRecoveryManager {
    /// Create the manager for `producer`.
    ///
    /// `required_sessions` are the sessions that must each confirm a recovery.
    /// `connection_up` is shared with whoever observes the broker connection.
    /// Producers that ignore recovery start, and stay, `Completed`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        producer: Arc<Producer>,
        issuer: Arc<RecoveryRequestIssuer>,
        required_sessions: Vec<SessionId>,
        settings: RecoverySettings,
        connection_up: Arc<AtomicBool>,
        clock: Arc<dyn Clock>,
        events: RecoveryEventDispatcher,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let initial = if producer.ignore_recovery() {
            ProducerRecoveryStatus::Completed
        } else {
            ProducerRecoveryStatus::NotStarted
        };
        producer.apply_status(initial);

        let operation = RecoveryOperation::new(
            Arc::clone(&producer),
            issuer,
            required_sessions,
            &settings,
            connection_up,
            Arc::clone(&clock),
        );
        let tracker = LivenessTracker::new(producer.id(), &settings, Arc::clone(&clock));

        Self {
            producer,
            status: AtomicU8::new(initial.as_u8()),
            state: Mutex::new(ManagerState {
                operation,
                tracker,
                previous_system_alive: None,
                has_completed_once: false,
                fatal_reason: None,
            }),
            settings,
            clock,
            events,
            metrics,
        }
    }

    pub fn producer(&self) -> &Arc<Producer> {
        &self.producer
    }

    /// Current status. Lock-free; may trail a transition in progress.
    pub fn status(&self) -> ProducerRecoveryStatus {
        ProducerRecoveryStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Request id of the running recovery, if any.
    pub async fn running_request_id(&self) -> Option<RequestId> {
        let state = self.state.lock().await;
        state
            .operation
            .is_running()
            .then(|| state.operation.request_id())
            .flatten()
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Handle a heartbeat received on the system session.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::Fatal`] once the producer can no longer recover.
    pub async fn process_system_message(&self, alive: &AliveMessage) -> Result<(), RecoveryError> {
        if alive.producer_id != self.producer.id() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        self.ensure_not_fatal(&state)?;

        state.tracker.on_system_alive(alive);
        let previous = state.previous_system_alive.replace(alive.clone());

        if self.producer.ignore_recovery() {
            return Ok(());
        }

        if !alive.subscribed {
            if state.operation.is_running() {
                // Resume from the last heartbeat known to be fully delivered
                let gap_at = previous.map(|p| p.timestamp).unwrap_or(alive.timestamp);
                warn!(
                    producer_id = %self.producer.id(),
                    gap_at = %gap_at,
                    "Unsubscribed heartbeat while recovering; interrupting recovery"
                );
                state.operation.interrupt(gap_at);
                return Ok(());
            }

            warn!(
                producer_id = %self.producer.id(),
                status = %self.status(),
                "Unsubscribed heartbeat; starting recovery"
            );
            if self.status().allows_dispatch() {
                // Messages were lost even if the recovery is rate limited
                self.set_status(
                    ProducerRecoveryStatus::Error,
                    None,
                    StatusChangeReason::ProducerUnsubscribed,
                );
            }
            return self.start_recovery(&mut state).await;
        }

        match self.status() {
            ProducerRecoveryStatus::NotStarted | ProducerRecoveryStatus::Error => {
                self.start_recovery(&mut state).await
            }
            _ => Ok(()),
        }
    }

    /// Handle a message received on a user session.
    ///
    /// Only feeds the liveness tracker and completes recoveries; it never
    /// starts one.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::Fatal`] once the producer can no longer recover.
    pub async fn process_user_message(
        &self,
        message: &FeedMessage,
        session: &SessionId,
    ) -> Result<(), RecoveryError> {
        if message.producer_id() != self.producer.id() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        self.ensure_not_fatal(&state)?;

        state.tracker.on_user_message(message, session);

        match message {
            FeedMessage::SnapshotComplete(snapshot) => {
                self.on_snapshot_complete(&mut state, snapshot, session);
            }
            FeedMessage::Alive(alive) if alive.subscribed => {
                if self.status().allows_dispatch() && !self.producer.ignore_recovery() {
                    if let Some(oldest) = state.tracker.oldest_user_alive_timestamp() {
                        self.producer.advance_last_timestamp_before_disconnect(oldest);
                    }
                }
            }
            FeedMessage::Data(data) => {
                if data.request_id.is_some() && data.request_id == state.operation.request_id() {
                    state.operation.record_progress();
                }
            }
            FeedMessage::Alive(_) => {}
        }

        Ok(())
    }

    /// Re-evaluate time-based conditions.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::Fatal`] once the producer can no longer recover.
    pub async fn check_status(&self) -> Result<(), RecoveryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_fatal(&state)?;
        self.expire_event_recoveries();

        if self.producer.ignore_recovery() {
            return Ok(());
        }

        if state.operation.is_running() && state.operation.has_timed_out() {
            if let Some(result) = state.operation.complete_timed_out() {
                warn!(
                    producer_id = %self.producer.id(),
                    request_id = %result.request_id,
                    elapsed_secs = result.duration.as_secs(),
                    "Recovery timed out"
                );
                self.on_recovery_finished(&mut state, result, None);
            }
            return Ok(());
        }

        let status = self.status();
        let running = state.operation.is_running();
        if (status == ProducerRecoveryStatus::Started) != running {
            error!(
                producer_id = %self.producer.id(),
                status = %status,
                running,
                "Recovery status and operation disagree; resetting"
            );
            self.reset_operation(&mut state);
            self.set_status(
                ProducerRecoveryStatus::Error,
                None,
                StatusChangeReason::InconsistentState,
            );
            return Ok(());
        }

        match status {
            ProducerRecoveryStatus::Completed | ProducerRecoveryStatus::Delayed => {
                self.check_up_producer(&state, status);
                Ok(())
            }
            ProducerRecoveryStatus::Started => self.check_running_recovery(&mut state).await,
            ProducerRecoveryStatus::NotStarted | ProducerRecoveryStatus::Error => {
                let silent_for = state.tracker.time_since_system_alive();
                if silent_for > self.settings.idle_alive_timeout {
                    info!(
                        producer_id = %self.producer.id(),
                        silent_secs = silent_for.as_secs(),
                        "No system heartbeat while idle; starting recovery"
                    );
                    return self.start_recovery(&mut state).await;
                }
                Ok(())
            }
            ProducerRecoveryStatus::FatalError => Ok(()),
        }
    }

    /// The broker connection went down.
    ///
    /// A running recovery is abandoned here. No new one starts until the
    /// shared connection flag is raised again, so nothing begun before the
    /// outage survives reconnection.
    pub async fn connection_shutdown(&self) {
        let mut state = self.state.lock().await;
        if self.producer.ignore_recovery() || self.status().is_terminal() {
            return;
        }

        match self.status() {
            ProducerRecoveryStatus::Completed | ProducerRecoveryStatus::Delayed => {
                self.set_status(
                    ProducerRecoveryStatus::Error,
                    None,
                    StatusChangeReason::ConnectionDown,
                );
            }
            ProducerRecoveryStatus::Started => {
                let request_id = state.operation.request_id();
                self.reset_operation(&mut state);
                self.set_status(
                    ProducerRecoveryStatus::Error,
                    request_id,
                    StatusChangeReason::ConnectionDown,
                );
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    async fn start_recovery(&self, state: &mut ManagerState) -> Result<(), RecoveryError> {
        match state.operation.start().await {
            StartOutcome::Started(request_id) => {
                self.metrics.record_recovery_started(self.producer.id());
                self.set_status(
                    ProducerRecoveryStatus::Started,
                    Some(request_id),
                    StatusChangeReason::RecoveryStarted,
                );
                Ok(())
            }
            StartOutcome::Skipped(reason) => {
                debug!(producer_id = %self.producer.id(), reason = ?reason, "Recovery not started");
                Ok(())
            }
            StartOutcome::Failed { request_id, error } => {
                warn!(
                    producer_id = %self.producer.id(),
                    request_id = %request_id,
                    error = %error,
                    "Recovery request failed; will retry"
                );
                self.set_status(
                    ProducerRecoveryStatus::Error,
                    Some(request_id),
                    StatusChangeReason::RecoveryFailed,
                );
                Ok(())
            }
            StartOutcome::Fatal(error) => {
                error!(
                    producer_id = %self.producer.id(),
                    error = %error,
                    "Producer cannot be recovered"
                );
                state.fatal_reason = Some(error.to_string());
                self.set_status(
                    ProducerRecoveryStatus::FatalError,
                    None,
                    StatusChangeReason::FatalLookback,
                );
                Err(self.fatal_error(state))
            }
        }
    }

    fn on_snapshot_complete(
        &self,
        state: &mut ManagerState,
        snapshot: &SnapshotCompleteMessage,
        session: &SessionId,
    ) {
        if let Some(event_id) = self.producer.take_event_recovery(snapshot.request_id) {
            info!(
                producer_id = %self.producer.id(),
                request_id = %snapshot.request_id,
                event_id = %event_id,
                "Event recovery completed"
            );
            self.events
                .publish(RecoveryEvent::EventRecoveryCompleted(EventRecoveryCompleted {
                    producer_id: self.producer.id(),
                    request_id: snapshot.request_id,
                    event_id,
                }));
            return;
        }

        if self.producer.ignore_recovery() {
            return;
        }

        if self.status() != ProducerRecoveryStatus::Started {
            debug!(
                producer_id = %self.producer.id(),
                request_id = %snapshot.request_id,
                status = %self.status(),
                "snapshot_complete while no recovery is running"
            );
            return;
        }

        if let Some(result) = state.operation.try_complete(session, snapshot.request_id) {
            self.on_recovery_finished(state, result, Some(snapshot.timestamp));
        }
    }

    fn on_recovery_finished(
        &self,
        state: &mut ManagerState,
        result: RecoveryResult,
        confirmed_at: Option<Timestamp>,
    ) {
        self.metrics
            .record_recovery_completed(self.producer.id(), result.duration, result.success);

        if result.success {
            if let Some(confirmed_at) = confirmed_at {
                self.producer
                    .advance_last_timestamp_before_disconnect(confirmed_at);
            }

            let reason = if state.has_completed_once {
                StatusChangeReason::RecoveryCompleted
            } else {
                StatusChangeReason::FirstRecoveryCompleted
            };
            state.has_completed_once = true;

            let next = if state.tracker.is_behind() {
                ProducerRecoveryStatus::Delayed
            } else {
                ProducerRecoveryStatus::Completed
            };
            info!(
                producer_id = %self.producer.id(),
                request_id = %result.request_id,
                elapsed_secs = result.duration.as_secs(),
                status = %next,
                "Recovery completed"
            );
            self.set_status(next, Some(result.request_id), reason);
        } else if let Some(interrupted_at) = result.interrupted_at {
            warn!(
                producer_id = %self.producer.id(),
                request_id = %result.request_id,
                interrupted_at = %interrupted_at,
                "Recovery completed with a gap; another recovery is required"
            );
            self.producer
                .set_last_timestamp_before_disconnect(Some(interrupted_at));
            self.set_status(
                ProducerRecoveryStatus::Error,
                Some(result.request_id),
                StatusChangeReason::RecoveryInterrupted,
            );
        } else {
            self.set_status(
                ProducerRecoveryStatus::Error,
                Some(result.request_id),
                StatusChangeReason::RecoveryTimedOut,
            );
        }

        state.operation.reset();
    }

    fn check_up_producer(&self, state: &ManagerState, status: ProducerRecoveryStatus) {
        if state.tracker.is_alive_violated() {
            warn!(
                producer_id = %self.producer.id(),
                silent_secs = state.tracker.time_since_system_alive().as_secs(),
                "Alive interval violated"
            );
            self.set_status(
                ProducerRecoveryStatus::Error,
                None,
                StatusChangeReason::AliveIntervalViolation,
            );
            return;
        }

        let behind = state.tracker.is_behind();
        match status {
            ProducerRecoveryStatus::Completed if behind => self.set_status(
                ProducerRecoveryStatus::Delayed,
                None,
                StatusChangeReason::ProcessingQueueDelayViolation,
            ),
            ProducerRecoveryStatus::Delayed if !behind => self.set_status(
                ProducerRecoveryStatus::Completed,
                None,
                StatusChangeReason::ProcessingQueueDelayStabilized,
            ),
            _ => {}
        }
    }

    async fn check_running_recovery(&self, state: &mut ManagerState) -> Result<(), RecoveryError> {
        if state.tracker.is_alive_violated() && state.operation.interrupted_at().is_none() {
            let gap_at = state
                .tracker
                .system_alive_timestamp()
                .or(state.operation.started_at())
                .unwrap_or_else(|| self.clock.now());
            warn!(
                producer_id = %self.producer.id(),
                gap_at = %gap_at,
                "Alive interval violated while recovering; interrupting recovery"
            );
            state.operation.interrupt(gap_at);
        }

        let stalled = state
            .operation
            .time_since_progress()
            .is_some_and(|idle| idle > self.settings.stalled_recovery_timeout);
        if stalled {
            let request_id = state.operation.request_id();
            warn!(
                producer_id = %self.producer.id(),
                request_id = ?request_id,
                "Recovery made no progress; restarting it"
            );
            self.reset_operation(state);
            self.set_status(
                ProducerRecoveryStatus::Error,
                request_id,
                StatusChangeReason::RecoveryTimedOut,
            );
            return self.start_recovery(state).await;
        }

        Ok(())
    }

    /// Abandon the operation, keeping any gap it observed.
    /// Event recoveries get the same time budget as producer recoveries.
    fn expire_event_recoveries(&self) {
        let cutoff = self
            .clock
            .now()
            .subtract_duration(self.settings.max_recovery_time);
        for (request_id, event_id) in self.producer.expire_event_recoveries(cutoff) {
            warn!(
                producer_id = %self.producer.id(),
                request_id = %request_id,
                event_id = %event_id,
                "Event recovery never completed; forgetting it"
            );
        }
    }

    fn reset_operation(&self, state: &mut ManagerState) {
        if let Some(interrupted_at) = state.operation.interrupted_at() {
            self.producer
                .set_last_timestamp_before_disconnect(Some(interrupted_at));
        }
        state.operation.reset();
    }

    /// Apply a transition; no-op when the status does not change.
    fn set_status(
        &self,
        new_status: ProducerRecoveryStatus,
        request_id: Option<RequestId>,
        reason: StatusChangeReason,
    ) {
        let old_status = self.status();
        if old_status == new_status || old_status.is_terminal() {
            return;
        }

        self.status.store(new_status.as_u8(), Ordering::Release);
        self.producer.apply_status(new_status);
        self.metrics
            .record_producer_status(self.producer.id(), self.producer.is_producer_down());

        info!(
            producer_id = %self.producer.id(),
            request_id = ?request_id,
            old_status = %old_status,
            new_status = %new_status,
            reason = ?reason,
            "Producer recovery status changed"
        );

        self.events
            .publish(RecoveryEvent::StatusChanged(StatusChange {
                producer_id: self.producer.id(),
                request_id,
                old_status,
                new_status,
                reason,
                timestamp: self.clock.now(),
            }));
    }

    fn ensure_not_fatal(&self, state: &ManagerState) -> Result<(), RecoveryError> {
        if self.status().is_terminal() {
            return Err(self.fatal_error(state));
        }
        Ok(())
    }

    fn fatal_error(&self, state: &ManagerState) -> RecoveryError {
        RecoveryError::Fatal {
            producer_id: self.producer.id(),
            reason: state
                .fatal_reason
                .clone()
                .unwrap_or_else(|| "producer is in fatal error state".to_string()),
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
