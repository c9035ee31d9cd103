//! Producer registry.
//!
//! [`ProducerRegistry`] owns every configured [`Producer`] for the lifetime of
//! the SDK. It is configured freely until [`ProducerRegistry::lock`] is called
//! when feed processing starts; after that, producer configuration is frozen
//! and only the recovery managers mutate producer state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::SdkConfig;
use crate::error::RegistryError;
use crate::monitoring::MetricsCollector;
use crate::producer::Producer;
use crate::{ProducerId, Timestamp};

/// The set of producers known to the SDK.
#[derive(Debug)]
pub struct ProducerRegistry {
    producers: BTreeMap<ProducerId, Arc<Producer>>,
    unknown: Arc<Producer>,
    locked: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl ProducerRegistry {
    pub fn new(producers: impl IntoIterator<Item = Producer>, clock: Arc<dyn Clock>) -> Self {
        let producers = producers
            .into_iter()
            .map(|p| (p.id(), Arc::new(p)))
            .collect();

        Self {
            producers,
            unknown: Arc::new(Producer::unknown()),
            locked: AtomicBool::new(false),
            clock,
        }
    }

    /// Build the registry from configuration.
    ///
    /// Producers that no configured session receives are disabled, since no
    /// session could ever confirm their recoveries. In replay mode every
    /// producer ignores recovery.
    pub fn from_config(config: &SdkConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = Self::new(config.producers.iter().map(Producer::from_config), clock);

        for producer in registry.producers.values() {
            producer.set_ignore_recovery(config.recovery.ignore_recovery);

            let covered = config
                .sessions
                .iter()
                .any(|s| s.interest.covers(producer.scope()));
            if !covered {
                warn!(
                    producer_id = %producer.id(),
                    scope = %producer.scope(),
                    "No configured session receives this producer; disabling it"
                );
                producer.set_disabled(true);
            }
        }

        registry
    }

    /// Freeze producer configuration.
    ///
    /// One-way; called once feed processing starts.
    pub fn lock(&self) {
        if !self.locked.swap(true, Ordering::AcqRel) {
            info!(producers = self.producers.len(), "Producer registry locked");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Resolve a producer by id.
    ///
    /// Unknown ids resolve to the shared "unknown" sentinel rather than
    /// failing, so message routing never has to special-case them.
    pub fn get(&self, id: ProducerId) -> Arc<Producer> {
        self.producers
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.unknown))
    }

    /// Resolve a producer by name, ignoring case.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Producer>> {
        self.producers
            .values()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn exists(&self, id: ProducerId) -> bool {
        self.producers.contains_key(&id)
    }

    /// All known producers, ordered by id.
    pub fn producers(&self) -> Vec<Arc<Producer>> {
        self.producers.values().cloned().collect()
    }

    /// Producers that are enabled and available.
    pub fn active_producers(&self) -> Vec<Arc<Producer>> {
        self.producers
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect()
    }

    pub fn enable_producer(&self, id: ProducerId) -> Result<(), RegistryError> {
        self.require_unlocked()?.lookup(id)?.set_disabled(false);
        Ok(())
    }

    pub fn disable_producer(&self, id: ProducerId) -> Result<(), RegistryError> {
        self.require_unlocked()?.lookup(id)?.set_disabled(true);
        Ok(())
    }

    /// Resume a producer from a known point in time instead of a full recovery.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::Locked`] after [`lock`](Self::lock)
    /// - [`RegistryError::UnknownProducer`] for unknown ids
    /// - [`RegistryError::TimestampTooOld`] when the API could not serve a
    ///   recovery that far back
    pub fn add_timestamp_before_disconnect(
        &self,
        id: ProducerId,
        timestamp: Timestamp,
    ) -> Result<(), RegistryError> {
        let producer = self.require_unlocked()?.lookup(id)?;

        let oldest_allowed = producer.oldest_allowed_after(self.clock.now());
        if timestamp < oldest_allowed {
            return Err(RegistryError::TimestampTooOld {
                id,
                timestamp,
                oldest_allowed,
            });
        }

        producer.set_last_timestamp_before_disconnect(Some(timestamp));
        Ok(())
    }

    pub fn remove_timestamp_before_disconnect(&self, id: ProducerId) -> Result<(), RegistryError> {
        self.require_unlocked()?
            .lookup(id)?
            .set_last_timestamp_before_disconnect(None);
        Ok(())
    }

    /// Emit a down/up gauge for every producer.
    ///
    /// Reads are lock-free and may lag an in-progress transition.
    pub fn report_status_gauges(&self, metrics: &dyn MetricsCollector) {
        for producer in self.producers.values() {
            metrics.record_producer_status(producer.id(), producer.is_producer_down());
        }
    }

    fn require_unlocked(&self) -> Result<&Self, RegistryError> {
        if self.is_locked() {
            return Err(RegistryError::Locked);
        }
        Ok(self)
    }

    fn lookup(&self, id: ProducerId) -> Result<&Arc<Producer>, RegistryError> {
        self.producers
            .get(&id)
            .ok_or(RegistryError::UnknownProducer { id })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
