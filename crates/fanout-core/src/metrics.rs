//! Prometheus metric handles for the delivery pipeline.
//!
//! The core only exposes increment/observe operations; text-format rendering
//! is an adapter concern. Handles are cheap to clone and share an underlying
//! atomic, so the worker pool and the exposition endpoint can hold the same
//! instances.

use prometheus_client::{
    metrics::{counter::Counter, histogram::Histogram},
    registry::Registry,
};

/// Histogram buckets for attempt latency in milliseconds.
const DURATION_BUCKETS_MS: [f64; 9] =
    [50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0];

/// Counters and histograms emitted by the delivery worker.
#[derive(Debug, Clone)]
pub struct DeliveryMetrics {
    /// Successful deliveries.
    pub sent: Counter,

    /// Retryable delivery failures.
    pub failed: Counter,

    /// Permanently failed (dead-lettered) deliveries.
    pub dead: Counter,

    /// Delivery attempt duration in milliseconds.
    pub duration_ms: Histogram,
}

impl DeliveryMetrics {
    /// Creates the metric handles and registers them under the `fanout`
    /// prefix.
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::unregistered();

        registry.register(
            "fanout_deliveries_sent",
            "Total number of successful deliveries",
            metrics.sent.clone(),
        );
        registry.register(
            "fanout_deliveries_failed",
            "Total number of retryable delivery failures",
            metrics.failed.clone(),
        );
        registry.register(
            "fanout_deliveries_dead",
            "Total number of permanently failed (DLQ) deliveries",
            metrics.dead.clone(),
        );
        registry.register(
            "fanout_delivery_duration_ms",
            "Delivery attempt duration in milliseconds",
            metrics.duration_ms.clone(),
        );

        metrics
    }

    /// Creates handles without registering them. Used by tests that only
    /// inspect counter values.
    pub fn unregistered() -> Self {
        Self {
            sent: Counter::default(),
            failed: Counter::default(),
            dead: Counter::default(),
            duration_ms: Histogram::new(DURATION_BUCKETS_MS.into_iter()),
        }
    }
}
