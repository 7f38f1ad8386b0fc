//! Coordinator metrics shared between the actor and observability surfaces.
//!
//! Gauges are plain atomics updated by the actor and read by health
//! reporting; counters additionally feed the Prometheus recorder installed
//! at startup. All metrics carry the `sb_` prefix.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared coordinator metrics.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    /// Current live connections.
    connections: AtomicUsize,
    /// Current non-terminal call sessions.
    active_calls: AtomicUsize,
    /// Total inbound events processed.
    events_processed: AtomicU64,
    /// Total outbound events dropped on full queues.
    events_dropped: AtomicU64,
}

/// Point-in-time view of the coordinator metrics.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub connections: usize,
    pub active_calls: usize,
    pub events_processed: u64,
    pub events_dropped: u64,
}

impl CoordinatorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        let count = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("sb_connections").set(usize_to_f64(count));
    }

    pub fn connection_closed(&self) {
        let count = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or(0)
            .saturating_sub(1);
        metrics::gauge!("sb_connections").set(usize_to_f64(count));
    }

    pub fn set_active_calls(&self, count: usize) {
        self.active_calls.store(count, Ordering::Relaxed);
        metrics::gauge!("sb_active_calls").set(usize_to_f64(count));
    }

    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sb_events_processed_total").increment(1);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sb_events_dropped_total").increment(1);
    }

    /// Snapshot all gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            active_calls: self.active_calls.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Gauge values are small table sizes; precision loss is not a concern.
#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}
