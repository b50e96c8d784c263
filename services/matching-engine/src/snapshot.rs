//! Versioned book snapshots
//!
//! A snapshot is a self-describing JSON document holding every resting order
//! of one book; restoring replays them through the normal add path.

use crate::order::Order;
use serde::{Deserialize, Serialize};
use services_common::{EngineError, EngineResult, Symbol};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// One book's replayable state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Format version; decoding rejects anything it does not know
    pub v: u32,
    /// Symbol the snapshot belongs to
    pub symbol: Symbol,
    /// Capture time in ms since epoch
    pub timestamp: i64,
    /// Resting orders (open quantity > 0), time priority order
    pub orders: Vec<Order>,
}

impl BookSnapshot {
    /// Build a snapshot for `symbol` from its open orders
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, timestamp: i64, orders: Vec<Order>) -> Self {
        Self {
            v: SNAPSHOT_VERSION,
            symbol: symbol.into(),
            timestamp,
            orders,
        }
    }

    /// Encode to the wire form
    pub fn encode(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and validate a snapshot payload
    pub fn decode(data: &str) -> EngineResult<Self> {
        let snapshot: BookSnapshot = serde_json::from_str(data)?;
        if snapshot.v != SNAPSHOT_VERSION {
            return Err(EngineError::InvalidInput(format!(
                "unsupported snapshot version {}",
                snapshot.v
            )));
        }
        Ok(snapshot)
    }
}
