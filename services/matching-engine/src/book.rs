//! Per-symbol order book: price-time priority matching, depth tracking and
//! deferred listener dispatch
//!
//! Operations never call listeners directly; they push [`BookEvent`]s onto a
//! pending queue which the owner drains with [`OrderBook::take_events`] after
//! the operation returns. That keeps the matching loop free of reentrancy and
//! lets the engine dispatch the whole batch under its critical section.

use crate::depth::{Depth, DepthLevel};
use crate::events::BookEvent;
use crate::order::{OrderHandle, OrderStatus};
use rustc_hash::FxHashMap;
use services_common::{constants::DEPTH_LEVELS, time::now_ms, OrderId, Price, Quantity, Side, Symbol};
use std::collections::BTreeMap;
use tracing::debug;

/// What to do when an incoming order would trade against the same user.
///
/// The matching layer itself permits self-trades; which behavior is wanted is
/// a product decision, so it hangs off the book as a policy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfTradePolicy {
    /// Let the execution happen (buyer and seller may be the same user)
    #[default]
    Allow,
    /// Stop matching and cancel the incoming remainder
    CancelTaker,
}

/// Sort key for resting orders: price priority first (bid prices negated so
/// both sides iterate best-first), then arrival time, then arrival sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct LevelKey {
    price_key: i64,
    timestamp: i64,
    seq: u64,
}

/// Reasons reused across cancel paths
const REASON_IOC: &str = "IOC residual";
const REASON_MARKET: &str = "market order residual";
const REASON_SELF_TRADE: &str = "self trade";
const REASON_AON: &str = "AON unfillable";

/// One symbol's book
pub struct OrderBook {
    symbol: Symbol,
    bids: BTreeMap<LevelKey, OrderHandle>,
    asks: BTreeMap<LevelKey, OrderHandle>,
    /// order_id -> current sort key, for cancel/replace lookups
    index: FxHashMap<OrderId, LevelKey>,
    next_seq: u64,
    policy: SelfTradePolicy,
    last_depth: Depth,
    pending: Vec<BookEvent>,
}

impl OrderBook {
    /// Create an empty book for `symbol`
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self::with_policy(symbol, SelfTradePolicy::default())
    }

    /// Create an empty book with an explicit self-trade policy
    #[must_use]
    pub fn with_policy(symbol: impl Into<Symbol>, policy: SelfTradePolicy) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: FxHashMap::default(),
            next_seq: 0,
            policy,
            last_depth: Depth::default(),
            pending: Vec::new(),
        }
    }

    /// Symbol this book matches
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Number of resting orders across both sides
    #[must_use]
    pub fn resting_count(&self) -> usize {
        self.index.len()
    }

    /// Drain the pending listener events accumulated by prior operations
    pub fn take_events(&mut self) -> Vec<BookEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Current top-N aggregated depth
    #[must_use]
    pub fn depth(&self) -> Depth {
        Depth {
            bids: Self::aggregate_side(&self.bids, Side::Buy),
            asks: Self::aggregate_side(&self.asks, Side::Sell),
        }
    }

    /// Best bid price, if any
    #[must_use]
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next().map(|k| (-k.price_key) as Price)
    }

    /// Best ask price, if any
    #[must_use]
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().map(|k| k.price_key as Price)
    }

    /// Admit an order for matching.
    ///
    /// Fires `Accepted`, then fills/trade events for each execution, then the
    /// residual outcome (rest, IOC/market cancel, AON reject), then a single
    /// depth event if the ladder moved.
    pub fn add(&mut self, handle: OrderHandle) {
        let (side, price, quantity, conditions, user_id) = {
            let mut order = handle.lock();
            order.status = OrderStatus::Accepted;
            (
                order.side,
                order.price,
                order.quantity,
                order.conditions,
                order.user_id.clone(),
            )
        };
        debug!(symbol = %self.symbol, side = %side, price, quantity, "order accepted");
        self.pending.push(BookEvent::Accepted {
            order: handle.clone(),
        });

        if conditions.all_or_none && !self.aon_fillable(side, price, quantity, &user_id) {
            handle.lock().status = OrderStatus::Rejected;
            self.pending.push(BookEvent::Rejected {
                order: handle,
                reason: REASON_AON.to_string(),
            });
            return;
        }

        let stopped_on_self_trade = self.match_incoming(&handle, side, price);

        let open_qty = handle.lock().open_qty();
        if open_qty > 0 {
            let is_market = price == 0;
            if stopped_on_self_trade {
                self.cancel_incoming(&handle, REASON_SELF_TRADE);
            } else if is_market {
                let reason = if conditions.immediate_or_cancel {
                    REASON_IOC
                } else {
                    REASON_MARKET
                };
                self.cancel_incoming(&handle, reason);
            } else if conditions.immediate_or_cancel {
                self.cancel_incoming(&handle, REASON_IOC);
            } else {
                self.rest(handle, side, price);
            }
        }

        self.emit_depth_if_changed();
    }

    /// Cancel a resting order. Fires `Cancelled` + depth, or `CancelRejected`
    /// when the order is unknown to the book or already terminal.
    pub fn cancel(&mut self, handle: OrderHandle) {
        let order_id = handle.lock().order_id.clone();
        let Some(key) = self.index.remove(&order_id) else {
            self.pending.push(BookEvent::CancelRejected {
                order: handle,
                reason: "order not resting".to_string(),
            });
            return;
        };

        let side = handle.lock().side;
        self.side_mut(side).remove(&key);
        handle.lock().status = OrderStatus::Cancelled;
        debug!(symbol = %self.symbol, %order_id, "order cancelled");
        self.pending.push(BookEvent::Cancelled {
            order: handle,
            reason: String::new(),
        });
        self.emit_depth_if_changed();
    }

    /// Adjust quantity and/or price of a resting order.
    ///
    /// `qty_delta` shifts the total order quantity; `new_price` of `0` keeps
    /// the current price. A price change loses time priority: the order is
    /// re-keyed to the tail of the new level and re-matched opportunistically
    /// before resting.
    pub fn replace(&mut self, handle: OrderHandle, qty_delta: i64, new_price: Price) {
        let (order_id, side, old_price, quantity, filled_qty, terminal) = {
            let order = handle.lock();
            (
                order.order_id.clone(),
                order.side,
                order.price,
                order.quantity,
                order.filled_qty,
                order.status.is_terminal(),
            )
        };

        if terminal {
            self.pending.push(BookEvent::ReplaceRejected {
                order: handle,
                reason: "order is terminal".to_string(),
            });
            return;
        }
        let Some(old_key) = self.index.get(&order_id).copied() else {
            self.pending.push(BookEvent::ReplaceRejected {
                order: handle,
                reason: "order not resting".to_string(),
            });
            return;
        };

        let new_qty = quantity as i64 + qty_delta;
        if new_qty <= filled_qty as i64 {
            self.pending.push(BookEvent::ReplaceRejected {
                order: handle,
                reason: "quantity below filled".to_string(),
            });
            return;
        }

        let target_price = if new_price == 0 { old_price } else { new_price };
        let price_changed = target_price != old_price;

        {
            let mut order = handle.lock();
            order.quantity = new_qty as Quantity;
            order.status = OrderStatus::Accepted;
        }

        if price_changed {
            // Re-queue at the tail of the new level: drop the old key, stamp
            // a fresh arrival time, then try the opposite side again.
            self.index.remove(&order_id);
            self.side_mut(side).remove(&old_key);
            {
                let mut order = handle.lock();
                order.price = target_price;
                order.timestamp = now_ms();
            }
            self.pending.push(BookEvent::Replaced {
                order: handle.clone(),
                qty_delta,
                new_price: target_price,
            });
            let stopped_on_self_trade = self.match_incoming(&handle, side, target_price);
            if stopped_on_self_trade {
                self.cancel_incoming(&handle, REASON_SELF_TRADE);
            } else if handle.lock().open_qty() > 0 {
                self.rest(handle, side, target_price);
            }
        } else {
            self.pending.push(BookEvent::Replaced {
                order: handle,
                qty_delta,
                new_price: target_price,
            });
        }
        debug!(symbol = %self.symbol, %order_id, qty_delta, new_price, "order replaced");
        self.emit_depth_if_changed();
    }

    /// All resting order handles, best price first per side (bids then asks)
    #[must_use]
    pub fn resting_orders(&self) -> Vec<OrderHandle> {
        self.bids.values().chain(self.asks.values()).cloned().collect()
    }

    // === internals ===

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<LevelKey, OrderHandle> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn price_key(side: Side, price: Price) -> i64 {
        match side {
            Side::Buy => -(price as i64),
            Side::Sell => price as i64,
        }
    }

    fn restore_price(side: Side, price_key: i64) -> Price {
        match side {
            Side::Buy => (-price_key) as Price,
            Side::Sell => price_key as Price,
        }
    }

    /// Whether a maker at `maker_price` is acceptable to a taker limited at
    /// `limit` (`0` = market, any price acceptable).
    fn crosses(taker_side: Side, limit: Price, maker_price: Price) -> bool {
        if limit == 0 {
            return true;
        }
        match taker_side {
            Side::Buy => maker_price <= limit,
            Side::Sell => maker_price >= limit,
        }
    }

    /// Sum of opposite-side liquidity priced within `limit`, for the AON
    /// single-pass feasibility check.
    ///
    /// Counts only what the matching loop can actually consume: under
    /// `CancelTaker` the loop halts at the first same-user maker, so
    /// liquidity queued behind it is unreachable and must not satisfy the
    /// gate.
    fn aon_fillable(
        &self,
        taker_side: Side,
        limit: Price,
        needed: Quantity,
        taker_user: &str,
    ) -> bool {
        let opposite = match taker_side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };
        let mut available: Quantity = 0;
        for (key, maker) in opposite {
            let maker_price = Self::restore_price(taker_side.opposite(), key.price_key);
            if !Self::crosses(taker_side, limit, maker_price) {
                break;
            }
            if self.policy == SelfTradePolicy::CancelTaker
                && maker.lock().user_id == taker_user
            {
                break;
            }
            available += maker.lock().open_qty();
            if available >= needed {
                return true;
            }
        }
        false
    }

    /// Run the matching loop for an incoming (or re-priced) order.
    ///
    /// Returns true when matching stopped because the self-trade policy
    /// cancelled the taker.
    fn match_incoming(&mut self, taker: &OrderHandle, taker_side: Side, limit: Price) -> bool {
        let taker_user = taker.lock().user_id.clone();
        loop {
            if taker.lock().open_qty() == 0 {
                return false;
            }

            let opposite = match taker_side {
                Side::Buy => &self.asks,
                Side::Sell => &self.bids,
            };
            let Some((key, maker)) = opposite.iter().next().map(|(k, v)| (*k, v.clone())) else {
                return false;
            };

            let maker_price = Self::restore_price(taker_side.opposite(), key.price_key);
            if !Self::crosses(taker_side, limit, maker_price) {
                return false;
            }

            if self.policy == SelfTradePolicy::CancelTaker
                && maker.lock().user_id == taker_user
            {
                return true;
            }

            let taker_open = taker.lock().open_qty();
            let maker_open = maker.lock().open_qty();
            let qty = taker_open.min(maker_open);
            let cost = qty * maker_price;

            // Execution price is the maker's price: improvement goes to the
            // taker. Both fill counters advance by the same qty and cost.
            taker.lock().fill(qty, cost, 0);
            maker.lock().fill(qty, cost, 0);

            self.pending.push(BookEvent::Filled {
                order: taker.clone(),
                matched: maker.clone(),
                qty,
                price: maker_price,
                is_taker: true,
            });
            self.pending.push(BookEvent::Filled {
                order: maker.clone(),
                matched: taker.clone(),
                qty,
                price: maker_price,
                is_taker: false,
            });
            self.pending.push(BookEvent::Traded {
                qty,
                price: maker_price,
            });

            if maker.lock().open_qty() == 0 {
                let maker_id = maker.lock().order_id.clone();
                self.side_mut(taker_side.opposite()).remove(&key);
                self.index.remove(&maker_id);
            }
        }
    }

    fn cancel_incoming(&mut self, handle: &OrderHandle, reason: &str) {
        handle.lock().status = OrderStatus::Cancelled;
        self.pending.push(BookEvent::Cancelled {
            order: handle.clone(),
            reason: reason.to_string(),
        });
    }

    fn rest(&mut self, handle: OrderHandle, side: Side, price: Price) {
        let (order_id, timestamp) = {
            let order = handle.lock();
            (order.order_id.clone(), order.timestamp)
        };
        let key = LevelKey {
            price_key: Self::price_key(side, price),
            timestamp,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(order_id, key);
        self.side_mut(side).insert(key, handle);
    }

    fn aggregate_side(side: &BTreeMap<LevelKey, OrderHandle>, which: Side) -> Vec<DepthLevel> {
        let mut levels: Vec<DepthLevel> = Vec::with_capacity(DEPTH_LEVELS);
        for (key, handle) in side {
            let price = Self::restore_price(which, key.price_key);
            let open = handle.lock().open_qty();
            match levels.last_mut() {
                Some(level) if level.price == price => {
                    level.aggregate_qty += open;
                    level.order_count += 1;
                }
                _ => {
                    if levels.len() == DEPTH_LEVELS {
                        break;
                    }
                    levels.push(DepthLevel {
                        price,
                        aggregate_qty: open,
                        order_count: 1,
                    });
                }
            }
        }
        levels
    }

    fn emit_depth_if_changed(&mut self) {
        let depth = self.depth();
        if depth == self.last_depth {
            return;
        }
        let event = if depth.bbo_differs(&self.last_depth) {
            BookEvent::BboChanged {
                depth: depth.clone(),
            }
        } else {
            BookEvent::DepthChanged {
                depth: depth.clone(),
            }
        };
        self.last_depth = depth;
        self.pending.push(event);
    }
}
