//! Core wire types shared by the engine and the aggregator
//!
//! Prices and quantities arrive on the wire as fixed-point integer ticks and
//! stay integers end to end; a price of `0` marks a market order.

use serde::{Deserialize, Serialize};

/// Price in integer ticks. `0` means market order.
pub type Price = u64;

/// Order / fill quantity in integer units.
pub type Quantity = u64;

/// Notional cost in ticks (`quantity * price`).
pub type Cost = u64;

/// Opaque order identifier, unique per symbol.
pub type OrderId = String;

/// Opaque user identifier.
pub type UserId = String;

/// Trading symbol.
pub type Symbol = String;

/// Side of an order or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy side (bid)
    Buy,
    /// Sell side (ask/offer)
    Sell,
}

impl Side {
    /// Check if this is the buy side
    #[inline]
    #[must_use]
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    /// Get the opposite side
    #[inline]
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Execution conditions carried on an order.
///
/// Matches the inbound wire shape: `{"all_or_none": bool, "immediate_or_cancel": bool}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConditions {
    /// Fill completely in one matching pass or reject
    #[serde(default)]
    pub all_or_none: bool,
    /// Cancel any unfilled residual instead of resting
    #[serde(default)]
    pub immediate_or_cancel: bool,
}

impl OrderConditions {
    /// No conditions set
    pub const NONE: Self = Self {
        all_or_none: false,
        immediate_or_cancel: false,
    };
}
