//! Engine-wide atomic counters

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across the engine, the handler and the RPC surface.
/// All increments are relaxed; these feed reports, not control flow.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Intents read from the inbound stream
    pub orders_received: AtomicU64,
    /// Orders admitted for matching
    pub orders_accepted: AtomicU64,
    /// Orders refused (policy or parse)
    pub orders_rejected: AtomicU64,
    /// Fill events published
    pub fills_published: AtomicU64,
    /// Executions
    pub trades_executed: AtomicU64,
    /// Cancels applied
    pub orders_cancelled: AtomicU64,
    /// Notifier messages displaced by overflow
    pub notifications_dropped: AtomicU64,
    /// Cache write failures skipped past
    pub kv_errors: AtomicU64,
}

impl EngineMetrics {
    /// Fresh zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter by one
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter
    #[inline]
    #[must_use]
    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Point-in-time JSON report for the periodic metrics log
    #[must_use]
    pub fn report(&self) -> serde_json::Value {
        json!({
            "orders_received": Self::read(&self.orders_received),
            "orders_accepted": Self::read(&self.orders_accepted),
            "orders_rejected": Self::read(&self.orders_rejected),
            "fills_published": Self::read(&self.fills_published),
            "trades_executed": Self::read(&self.trades_executed),
            "orders_cancelled": Self::read(&self.orders_cancelled),
            "notifications_dropped": Self::read(&self.notifications_dropped),
            "kv_errors": Self::read(&self.kv_errors),
        })
    }
}
