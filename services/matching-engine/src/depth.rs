//! Aggregated depth ladder (top N price levels per side)

use serde::{Deserialize, Serialize};
use services_common::{Price, Quantity};

/// One aggregated price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Level price
    pub price: Price,
    /// Sum of open quantities resting at this price
    pub aggregate_qty: Quantity,
    /// Number of resting orders at this price
    pub order_count: u64,
}

/// Size-bounded aggregation of the top levels on each side.
///
/// Bids descend, asks ascend; levels with no orders are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    /// Bid ladder, best first
    pub bids: Vec<DepthLevel>,
    /// Ask ladder, best first
    pub asks: Vec<DepthLevel>,
}

impl Depth {
    /// Best bid level, if any
    #[must_use]
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    /// Best ask level, if any
    #[must_use]
    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }

    /// Whether the top-of-book differs from `other` on either side
    #[must_use]
    pub fn bbo_differs(&self, other: &Depth) -> bool {
        self.best_bid() != other.best_bid() || self.best_ask() != other.best_ask()
    }
}
