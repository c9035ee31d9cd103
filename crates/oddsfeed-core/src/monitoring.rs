//! Metrics collection for recovery operations.
//!
//! The recovery layer only defines *what* is measured. Applications plug in a
//! collector backed by their metrics system; the SDK ships a no-op one.
//!
//! Recording is best-effort: collectors must never fail or block, and the
//! recovery state machine does not look at what they do.
//!
//! # Examples
//!
//! ```rust
//! use oddsfeed_core::monitoring::{MetricsCollector, NoOpMetricsCollector};
//! use oddsfeed_core::ProducerId;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let metrics: Arc<dyn MetricsCollector> = Arc::new(NoOpMetricsCollector);
//!
//! metrics.record_producer_status(ProducerId::new(1), true);
//! metrics.record_recovery_started(ProducerId::new(1));
//! metrics.record_recovery_completed(ProducerId::new(1), Duration::from_secs(42), true);
//! ```

use std::time::Duration;

use crate::ProducerId;

/// Metrics collector for producer recovery.
///
/// All methods take `&self` so one collector can be shared as
/// `Arc<dyn MetricsCollector>` across every producer manager.
pub trait MetricsCollector: Send + Sync {
    /// Record whether a producer is currently down.
    ///
    /// # Metrics Updated
    ///
    /// - `producer_down`: Gauge set to 1 when down, 0 when up
    fn record_producer_status(&self, producer_id: ProducerId, down: bool);

    /// Record that a recovery request was accepted by the API.
    ///
    /// # Metrics Updated
    ///
    /// - `recoveries_started_total`: Incremented by 1
    fn record_recovery_started(&self, producer_id: ProducerId);

    /// Record the end of a recovery.
    ///
    /// # Parameters
    ///
    /// - `duration`: Time from request to final confirmation or failure
    /// - `success`: `false` for interrupted or timed-out recoveries
    ///
    /// # Metrics Updated
    ///
    /// - `recovery_duration_seconds`: Histogram observation
    /// - `recoveries_failed_total`: Incremented if !success
    fn record_recovery_completed(&self, producer_id: ProducerId, duration: Duration, success: bool);
}

/// Collector that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn record_producer_status(&self, _producer_id: ProducerId, _down: bool) {}

    fn record_recovery_started(&self, _producer_id: ProducerId) {}

    fn record_recovery_completed(
        &self,
        _producer_id: ProducerId,
        _duration: Duration,
        _success: bool,
    ) {
    }
}
