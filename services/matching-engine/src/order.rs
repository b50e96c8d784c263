//! Order entity and inbound intent parsing

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use services_common::{
    time::now_ms, Cost, OrderConditions, OrderId, Price, Quantity, Side, Symbol, UserId,
};
use std::sync::Arc;

/// Shared handle to an order; the book and the per-symbol index hold the
/// same allocation so fills are visible to snapshots immediately.
pub type OrderHandle = Arc<Mutex<Order>>;

/// Lifecycle of an order inside the engine.
///
/// `Replaced` transitions back to `Accepted` at the new level; `Filled`,
/// `Cancelled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Parsed, not yet admitted
    New,
    /// Admitted for matching
    Accepted,
    /// Some quantity executed, remainder open
    PartialFill,
    /// Fully executed
    Filled,
    /// Removed before completion
    Cancelled,
    /// Refused by policy
    Rejected,
}

impl OrderStatus {
    /// Terminal states admit no further transitions
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// One order: intent plus running fill state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique per symbol
    pub order_id: OrderId,
    /// Owning user
    pub user_id: UserId,
    /// Trading symbol
    pub symbol: Symbol,
    /// Buy or sell
    pub side: Side,
    /// Limit price in ticks; `0` = market order
    pub price: Price,
    /// Stop price; `0` = none
    #[serde(default)]
    pub stop_price: Price,
    /// Total order quantity
    pub quantity: Quantity,
    /// Executed quantity, monotonic
    #[serde(default)]
    pub filled_qty: Quantity,
    /// Executed notional, monotonic
    #[serde(default)]
    pub filled_cost: Cost,
    /// Execution conditions
    #[serde(default)]
    pub conditions: OrderConditions,
    /// Arrival time in ms since epoch; defines time priority
    pub timestamp: i64,
    /// Current lifecycle state
    #[serde(skip, default = "default_status")]
    pub status: OrderStatus,
}

fn default_status() -> OrderStatus {
    OrderStatus::New
}

impl Order {
    /// Remaining open quantity
    #[inline]
    #[must_use]
    pub fn open_qty(&self) -> Quantity {
        self.quantity - self.filled_qty
    }

    /// Market orders carry no limit price
    #[inline]
    #[must_use]
    pub fn is_market(&self) -> bool {
        self.price == 0
    }

    /// Whether the order can still trade or rest
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal() && self.open_qty() > 0
    }

    /// Apply one execution to this order.
    ///
    /// `fill_id` is opaque and reserved for downstream reconciliation.
    ///
    /// # Panics
    /// A fill larger than the open quantity violates the book's conservation
    /// invariant and is a bug, not an input error.
    pub fn fill(&mut self, qty: Quantity, cost: Cost, _fill_id: u64) {
        assert!(
            qty <= self.open_qty(),
            "fill {} exceeds open quantity {} on {}",
            qty,
            self.open_qty(),
            self.order_id
        );
        self.filled_qty += qty;
        self.filled_cost += cost;
        self.status = if self.open_qty() == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartialFill
        };
    }

    /// Wrap into a shared handle
    #[must_use]
    pub fn into_handle(self) -> OrderHandle {
        Arc::new(Mutex::new(self))
    }
}

/// Action requested by an inbound stream record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentAction {
    /// Admit a new order
    Add,
    /// Cancel a resting order
    Cancel,
    /// Adjust quantity and/or price of a resting order
    Replace,
}

/// Inbound order intent, one JSON record per stream message.
///
/// Accepts either `side: "BUY"|"SELL"` or the legacy `is_buy` boolean; a
/// missing timestamp is stamped at parse time.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderIntent {
    /// Requested action (defaults to ADD)
    #[serde(default = "default_action")]
    pub action: IntentAction,
    /// Order identifier
    pub order_id: OrderId,
    /// Owning user
    #[serde(default)]
    pub user_id: UserId,
    /// Trading symbol
    pub symbol: Symbol,
    /// Side as a string
    #[serde(default)]
    pub side: Option<Side>,
    /// Legacy boolean side
    #[serde(default)]
    pub is_buy: Option<bool>,
    /// Limit price; `0` = market
    #[serde(default)]
    pub price: Price,
    /// Order quantity
    #[serde(default)]
    pub quantity: Quantity,
    /// Stop price; `0` = none
    #[serde(default)]
    pub stop_price: Price,
    /// Execution conditions
    #[serde(default)]
    pub conditions: OrderConditions,
    /// Arrival time in ms
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// REPLACE only: signed quantity adjustment
    #[serde(default)]
    pub qty_delta: i64,
    /// REPLACE only: new limit price (`0` keeps the current price)
    #[serde(default)]
    pub new_price: Price,
}

fn default_action() -> IntentAction {
    IntentAction::Add
}

impl OrderIntent {
    /// Resolved side: explicit `side` wins, then `is_buy`, then BUY
    #[must_use]
    pub fn resolved_side(&self) -> Side {
        if let Some(side) = self.side {
            return side;
        }
        match self.is_buy {
            Some(false) => Side::Sell,
            _ => Side::Buy,
        }
    }

    /// Build the order entity for an ADD
    #[must_use]
    pub fn into_order(self) -> Order {
        let side = self.resolved_side();
        let timestamp = self.timestamp.unwrap_or_else(now_ms);
        Order {
            order_id: self.order_id,
            user_id: self.user_id,
            symbol: self.symbol,
            side,
            price: self.price,
            stop_price: self.stop_price,
            quantity: self.quantity,
            filled_qty: 0,
            filled_cost: 0,
            conditions: self.conditions,
            timestamp,
            status: OrderStatus::New,
        }
    }
}
