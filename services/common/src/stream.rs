//! In-process stand-in for the inbound/outbound event streams
//!
//! The real transports (the external stream producer/consumer libraries) are
//! out of scope; what the engine needs from them is ordered, topic-keyed
//! fan-out. [`StreamBus`] provides exactly that over broadcast channels so
//! transport adapters can bridge records in and out at the process edge.
//! Records for one topic are delivered to every subscriber in publish order.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// One stream record: JSON payload keyed by symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Topic name
    pub topic: String,
    /// Partitioning key (the symbol)
    pub key: String,
    /// JSON payload
    pub payload: String,
}

/// Topic-keyed broadcast fan-out
pub struct StreamBus {
    capacity: usize,
    channels: RwLock<FxHashMap<String, broadcast::Sender<StreamRecord>>>,
}

impl StreamBus {
    /// Create a bus whose per-topic channels buffer up to `capacity` records
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: RwLock::new(FxHashMap::default()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<StreamRecord> {
        if let Some(tx) = self.channels.read().get(topic) {
            return tx.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish a record. Records without subscribers are dropped, matching
    /// fire-and-forget stream semantics.
    pub fn publish(&self, topic: &str, key: &str, payload: String) {
        let record = StreamRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };
        let receivers = self.sender(topic).send(record).unwrap_or(0);
        debug!(topic, key, receivers, "record published");
    }

    /// Subscribe to a topic; each subscriber sees every record published
    /// after the call, in publish order.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<StreamRecord> {
        self.sender(topic).subscribe()
    }

    /// Active subscriber count for a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

/// Shared bus handle
pub type SharedBus = Arc<StreamBus>;
