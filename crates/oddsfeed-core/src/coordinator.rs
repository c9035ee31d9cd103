//! Feed-level recovery coordination.
//!
//! [`FeedRecoveryCoordinator`] is what the message-dispatch layer talks to.
//! It owns the producer registry, one [`ProducerRecoveryManager`] per active
//! producer, and one status-poll task per manager, and it forwards broker
//! connection events to every manager.
//!
//! # Lifecycle
//!
//! 1. Build with [`FeedRecoveryCoordinator::builder`]
//! 2. Optionally adjust producers through [`registry`](FeedRecoveryCoordinator::registry)
//! 3. [`open`](FeedRecoveryCoordinator::open): locks the registry and starts polling
//! 4. Feed messages in; watch [`is_closed`](FeedRecoveryCoordinator::is_closed)
//! 5. [`close`](FeedRecoveryCoordinator::close) (also on drop)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, SdkConfig, SessionConfig};
use crate::error::RecoveryError;
use crate::events::{NoOpRecoveryEventHandler, RecoveryEventDispatcher, RecoveryEventHandler};
use crate::issuer::{EventRecoveryKind, InitiationOutcome, RecoveryRequestIssuer, RequestIdSequence};
use crate::manager::ProducerRecoveryManager;
use crate::messages::{AliveMessage, FeedMessage};
use crate::monitoring::{MetricsCollector, NoOpMetricsCollector};
use crate::producer::ProducerScope;
use crate::registry::ProducerRegistry;
use crate::status::ProducerRecoveryStatus;
use crate::transport::{HttpRecoveryTransport, RecoveryTransport};
use crate::{EventId, ProducerId, SessionId};

type Managers = BTreeMap<ProducerId, Arc<ProducerRecoveryManager>>;

/// Routes feed traffic to per-producer recovery managers.
pub struct FeedRecoveryCoordinator {
    config: SdkConfig,
    registry: Arc<ProducerRegistry>,
    issuer: Arc<RecoveryRequestIssuer>,
    clock: Arc<dyn Clock>,
    events: RecoveryEventDispatcher,
    metrics: Arc<dyn MetricsCollector>,
    connection_up: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    poll_status: bool,
    managers: OnceLock<Managers>,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for FeedRecoveryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedRecoveryCoordinator")
            .field("producers", &self.registry.producers().len())
            .field("opened", &self.managers.get().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FeedRecoveryCoordinator {
    pub fn builder(config: SdkConfig) -> FeedRecoveryCoordinatorBuilder {
        FeedRecoveryCoordinatorBuilder::new(config)
    }

    /// The producer registry; writable until [`open`](Self::open).
    pub fn registry(&self) -> &Arc<ProducerRegistry> {
        &self.registry
    }

    /// Start recovery management.
    ///
    /// Locks the registry, creates a manager for every active producer, and
    /// spawns their status polls. Must be called within a Tokio runtime when
    /// polling is enabled. Calling it again has no effect.
    pub fn open(&self) {
        if self.managers.get().is_some() {
            warn!("Recovery coordinator already opened");
            return;
        }

        self.registry.lock();
        let settings = self.config.recovery.settings();

        let mut managers = Managers::new();
        for producer in self.registry.active_producers() {
            let sessions = required_sessions(&self.config.sessions, producer.scope());
            let manager = ProducerRecoveryManager::new(
                Arc::clone(&producer),
                Arc::clone(&self.issuer),
                sessions,
                settings,
                Arc::clone(&self.connection_up),
                Arc::clone(&self.clock),
                self.events.clone(),
                Arc::clone(&self.metrics),
            );
            managers.insert(producer.id(), Arc::new(manager));
        }

        let managers = self.managers.get_or_init(|| managers);
        info!(producers = managers.len(), "Recovery coordinator opened");

        if self.poll_status {
            let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
            for manager in managers.values() {
                pollers.push(self.spawn_poller(Arc::clone(manager)));
            }
        }
    }

    /// Stop polling. Further messages are ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        for poller in pollers.drain(..) {
            poller.abort();
        }
    }

    /// Whether the coordinator stopped, either explicitly or because a
    /// producer can no longer recover.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn manager(&self, producer_id: ProducerId) -> Option<Arc<ProducerRecoveryManager>> {
        self.managers.get()?.get(&producer_id).cloned()
    }

    /// Lock-free status snapshot of a managed producer.
    pub fn status(&self, producer_id: ProducerId) -> Option<ProducerRecoveryStatus> {
        self.manager(producer_id).map(|m| m.status())
    }

    /// Route a heartbeat from the system session.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::Fatal`] when the producer can no longer recover; the
    /// coordinator is closed at the same time.
    pub async fn process_system_message(&self, alive: &AliveMessage) -> Result<(), RecoveryError> {
        let Some(manager) = self.route(alive.producer_id, "alive") else {
            return Ok(());
        };
        let result = manager.process_system_message(alive).await;
        self.latch_fatal(result)
    }

    /// Route a message from a user session.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::Fatal`] when the producer can no longer recover; the
    /// coordinator is closed at the same time.
    pub async fn process_user_message(
        &self,
        message: &FeedMessage,
        session: &SessionId,
    ) -> Result<(), RecoveryError> {
        let Some(manager) = self.route(message.producer_id(), message.name()) else {
            return Ok(());
        };
        let result = manager.process_user_message(message, session).await;
        self.latch_fatal(result)
    }

    /// Run one status evaluation for every producer.
    ///
    /// The spawned polls do this periodically; calling it directly is useful
    /// when polling is disabled.
    ///
    /// # Errors
    ///
    /// The first [`RecoveryError::Fatal`] encountered.
    pub async fn check_status(&self) -> Result<(), RecoveryError> {
        let Some(managers) = self.managers.get().filter(|_| !self.is_closed()) else {
            return Ok(());
        };
        let mut first_error = None;
        for manager in managers.values() {
            if let Err(e) = manager.check_status().await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => self.latch_fatal(Err(e)),
            None => Ok(()),
        }
    }

    /// The broker connection went down.
    pub async fn connection_shutdown(&self) {
        warn!("Broker connection down");
        self.connection_up.store(false, Ordering::Release);
        if let Some(managers) = self.managers.get() {
            for manager in managers.values() {
                manager.connection_shutdown().await;
            }
        }
    }

    /// The broker connection is back.
    ///
    /// Producers recover on their next heartbeat or status poll.
    pub async fn connection_restored(&self) {
        info!("Broker connection restored");
        self.connection_up.store(true, Ordering::Release);
    }

    /// Ask for re-delivery of one sport event's messages.
    ///
    /// `stateful` limits the recovery to stateful messages. Completion is
    /// reported through an `EventRecoveryCompleted` notification.
    ///
    /// # Errors
    ///
    /// [`RecoveryError::UnknownProducer`] for producers this feed does not manage.
    pub async fn recover_event(
        &self,
        producer_id: ProducerId,
        event_id: &EventId,
        stateful: bool,
    ) -> Result<InitiationOutcome, RecoveryError> {
        let manager = self
            .manager(producer_id)
            .ok_or(RecoveryError::UnknownProducer { producer_id })?;

        let kind = if stateful {
            EventRecoveryKind::Stateful
        } else {
            EventRecoveryKind::Odds
        };
        Ok(self
            .issuer
            .request_event_recovery(manager.producer(), event_id, kind)
            .await)
    }

    /// Emit one down/up gauge per producer.
    pub fn report_status_gauges(&self) {
        self.registry.report_status_gauges(self.metrics.as_ref());
    }

    fn route(&self, producer_id: ProducerId, kind: &str) -> Option<Arc<ProducerRecoveryManager>> {
        if self.is_closed() {
            debug!(producer_id = %producer_id, message = kind, "Coordinator closed; dropping message");
            return None;
        }

        let manager = self.manager(producer_id);
        if manager.is_none() {
            debug!(
                producer_id = %producer_id,
                message = kind,
                "No recovery manager for producer; dropping message"
            );
        }
        manager
    }

    fn latch_fatal(&self, result: Result<(), RecoveryError>) -> Result<(), RecoveryError> {
        if let Err(e) = &result {
            if !self.closed.swap(true, Ordering::AcqRel) {
                error!(error = %e, "Producer cannot recover; closing recovery coordinator");
            }
        }
        result
    }

    fn spawn_poller(&self, manager: Arc<ProducerRecoveryManager>) -> JoinHandle<()> {
        let closed = Arc::clone(&self.closed);
        let period = self.config.recovery.settings().status_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if closed.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = manager.check_status().await {
                    if !closed.swap(true, Ordering::AcqRel) {
                        error!(error = %e, "Producer cannot recover; closing recovery coordinator");
                    }
                    break;
                }
            }
            debug!(producer_id = %manager.producer().id(), "Status poll stopped");
        })
    }
}

impl Drop for FeedRecoveryCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sessions whose interest covers `scope`, i.e. the ones that must confirm
/// a recovery of a producer with that scope.
pub fn required_sessions(sessions: &[SessionConfig], scope: ProducerScope) -> Vec<SessionId> {
    sessions
        .iter()
        .filter(|s| s.interest.covers(scope))
        .filter_map(|s| s.session_id().ok())
        .collect()
}

/// Builder for [`FeedRecoveryCoordinator`].
pub struct FeedRecoveryCoordinatorBuilder {
    config: SdkConfig,
    transport: Option<Arc<dyn RecoveryTransport>>,
    handler: Option<Arc<dyn RecoveryEventHandler>>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    poll_status: bool,
}

impl FeedRecoveryCoordinatorBuilder {
    fn new(config: SdkConfig) -> Self {
        Self {
            config,
            transport: None,
            handler: None,
            clock: None,
            metrics: None,
            poll_status: true,
        }
    }

    /// Use a custom transport instead of the reqwest one built from `config.api`.
    pub fn transport(mut self, transport: Arc<dyn RecoveryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn RecoveryEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether [`FeedRecoveryCoordinator::open`] spawns periodic status polls.
    pub fn poll_status(mut self, enabled: bool) -> Self {
        self.poll_status = enabled;
        self
    }

    /// Build the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// transport cannot be created.
    pub fn build(self) -> Result<FeedRecoveryCoordinator, ConfigError> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpRecoveryTransport::new(&self.config.api).map_err(|e| {
                ConfigError::Validation {
                    field: "api".to_string(),
                    message: e.to_string(),
                }
            })?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(NoOpRecoveryEventHandler));
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(NoOpMetricsCollector));

        let events = RecoveryEventDispatcher::new(handler);
        let registry = Arc::new(ProducerRegistry::from_config(&self.config, Arc::clone(&clock)));
        let issuer = Arc::new(RecoveryRequestIssuer::new(
            transport,
            Arc::new(RequestIdSequence::new()),
            self.config.api.node_id,
            Arc::clone(&clock),
            events.clone(),
        ));

        Ok(FeedRecoveryCoordinator {
            config: self.config,
            registry,
            issuer,
            clock,
            events,
            metrics,
            connection_up: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicBool::new(false)),
            poll_status: self.poll_status,
            managers: OnceLock::new(),
            pollers: Mutex::new(Vec::new()),
        })
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
