//! Market-data fan-out
//!
//! Consumes every book event from every book the engine owns and turns it
//! into: stream records on the outbound topics, cache writes (depth, ticker,
//! day aggregate, live candle), durable trade rows and user notifications.
//!
//! Side-effect ordering per execution: the book has already applied the fill
//! to both orders; this handler updates the day aggregate before the cache
//! and trade-store writes, and none of those writes can block the user
//! notification — sink failures are logged and skipped.

use crate::day::DayAggregate;
use crate::depth::Depth;
use crate::events::BookEvent;
use crate::metrics::EngineMetrics;
use crate::notifier::Notifier;
use crate::order::OrderHandle;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use services_common::constants::{keys, topics, DEPTH_WIRE_LEVELS};
use services_common::kv::Kv;
use services_common::storage::{TradeRecord, TradeStore};
use services_common::stream::SharedBus;
use services_common::time::{minute_key, now_ms, trading_day};
use services_common::{Price, Quantity, Symbol};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Listener-driven market-data pipeline
pub struct MarketDataHandler {
    kv: Arc<dyn Kv>,
    trade_store: Arc<dyn TradeStore>,
    bus: SharedBus,
    notifier: Arc<Notifier>,
    metrics: Arc<EngineMetrics>,
    session_offset_hours: i64,
    days: Mutex<FxHashMap<Symbol, DayAggregate>>,
}

impl MarketDataHandler {
    /// Wire the handler to its sinks
    pub fn new(
        kv: Arc<dyn Kv>,
        trade_store: Arc<dyn TradeStore>,
        bus: SharedBus,
        notifier: Arc<Notifier>,
        metrics: Arc<EngineMetrics>,
        session_offset_hours: i64,
    ) -> Self {
        Self {
            kv,
            trade_store,
            bus,
            notifier,
            metrics,
            session_offset_hours,
            days: Mutex::new(FxHashMap::default()),
        }
    }

    /// Dispatch one batch of book events, in book order
    pub async fn on_events(&self, symbol: &str, events: Vec<BookEvent>) {
        for event in events {
            match event {
                BookEvent::Accepted { order } => {
                    EngineMetrics::incr(&self.metrics.orders_accepted);
                    self.emit_status(symbol, &order, "ACCEPTED", "").await;
                }
                BookEvent::Rejected { order, reason } => {
                    EngineMetrics::incr(&self.metrics.orders_rejected);
                    self.emit_status(symbol, &order, "REJECTED", &reason).await;
                }
                BookEvent::Filled {
                    order,
                    matched,
                    qty,
                    price,
                    is_taker,
                } => {
                    self.on_fill(symbol, &order, &matched, qty, price, is_taker)
                        .await;
                }
                BookEvent::Traded { qty, price } => {
                    EngineMetrics::incr(&self.metrics.trades_executed);
                    self.publish(
                        topics::TRADES,
                        symbol,
                        json!({
                            "event": "TRADE",
                            "symbol": symbol,
                            "quantity": qty,
                            "price": price,
                            "timestamp": now_ms(),
                        }),
                    );
                }
                BookEvent::Cancelled { order, reason } => {
                    EngineMetrics::incr(&self.metrics.orders_cancelled);
                    self.emit_status(symbol, &order, "CANCELLED", &reason).await;
                }
                BookEvent::CancelRejected { order, reason } => {
                    self.emit_status(symbol, &order, "CANCEL_REJECTED", &reason)
                        .await;
                }
                BookEvent::Replaced { order, .. } => {
                    self.emit_status(symbol, &order, "REPLACED", "").await;
                }
                BookEvent::ReplaceRejected { order, reason } => {
                    self.emit_status(symbol, &order, "REPLACE_REJECTED", &reason)
                        .await;
                }
                BookEvent::DepthChanged { depth } | BookEvent::BboChanged { depth } => {
                    self.on_depth_change(symbol, &depth).await;
                }
            }
        }
    }

    /// Close out any aggregates whose session date has passed. Called by the
    /// day-boundary timer for symbols with no overnight trades; the per-trade
    /// path performs the same roll inline.
    pub async fn roll_outdated_days(&self) {
        let today = trading_day(services_common::time::now_secs(), self.session_offset_hours);
        let rolled: Vec<(Symbol, String)> = {
            let mut days = self.days.lock();
            days.iter_mut()
                .filter(|(_, day)| day.needs_roll(&today))
                .map(|(symbol, day)| {
                    let prev = day.roll(symbol, &today);
                    (symbol.clone(), serde_json::to_string(&prev).unwrap_or_default())
                })
                .collect()
        };
        for (symbol, prev_json) in rolled {
            info!(%symbol, "trading day rolled");
            self.kv_set(&format!("{}{symbol}", keys::PREV_DAY_PREFIX), &prev_json)
                .await;
        }
    }

    // === fills ===

    async fn on_fill(
        &self,
        symbol: &str,
        order: &OrderHandle,
        matched: &OrderHandle,
        qty: Quantity,
        price: Price,
        is_taker: bool,
    ) {
        let (order_id, user_id, is_buy, open_qty) = {
            let o = order.lock();
            (o.order_id.clone(), o.user_id.clone(), o.side.is_buy(), o.open_qty())
        };
        let (matched_id, matched_user) = {
            let m = matched.lock();
            (m.order_id.clone(), m.user_id.clone())
        };
        let (buyer_id, seller_id) = if is_buy {
            (user_id.clone(), matched_user.clone())
        } else {
            (matched_user.clone(), user_id.clone())
        };
        let (buyer_order, seller_order) = if is_buy {
            (order_id.clone(), matched_id.clone())
        } else {
            (matched_id.clone(), order_id.clone())
        };
        let ts = now_ms();

        EngineMetrics::incr(&self.metrics.fills_published);
        self.publish(
            topics::FILLS,
            symbol,
            json!({
                "event": "FILL",
                "symbol": symbol,
                "order_id": order_id,
                "matched_order_id": matched_id,
                "buyer_id": buyer_id,
                "seller_id": seller_id,
                "fill_qty": qty,
                "fill_price": price,
                "timestamp": ts,
            }),
        );

        // The aggregate, cache and durable writes run once per execution, on
        // the taker-side event; the maker-side event only publishes and
        // notifies.
        if is_taker {
            self.apply_execution(symbol, price, qty, ts, &buyer_id, &seller_id, &buyer_order, &seller_order)
                .await;
        }

        let status = if open_qty == 0 { "FILLED" } else { "PARTIAL" };
        self.notifier.push(
            &user_id,
            json!({
                "type": "ORDER_STATUS",
                "data": {
                    "order_id": order_id,
                    "symbol": symbol,
                    "status": status,
                    "filled_qty": qty,
                    "filled_price": price,
                    "timestamp": ts,
                },
            }),
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_execution(
        &self,
        symbol: &str,
        price: Price,
        qty: Quantity,
        ts_ms: i64,
        buyer_id: &str,
        seller_id: &str,
        buyer_order: &str,
        seller_order: &str,
    ) {
        let epoch_secs = ts_ms / 1000;
        let today = trading_day(epoch_secs, self.session_offset_hours);

        // Day aggregate first; the cache snapshots read its state.
        let (prev_json, ohlc_json, ticker_json) = {
            let mut days = self.days.lock();
            let day = days
                .entry(symbol.to_string())
                .or_insert_with(|| DayAggregate::new(today.clone()));
            let prev_json = if day.needs_roll(&today) {
                let prev = day.roll(symbol, &today);
                Some(serde_json::to_string(&prev).unwrap_or_default())
            } else {
                None
            };
            day.apply_trade(price, qty);
            (
                prev_json,
                day.ohlc_json(symbol, ts_ms),
                day.ticker_json(symbol, ts_ms),
            )
        };

        if let Some(prev) = prev_json {
            info!(symbol, "trading day rolled on trade");
            self.kv_set(&format!("{}{symbol}", keys::PREV_DAY_PREFIX), &prev)
                .await;
        }
        self.kv_set(&format!("{}{symbol}", keys::OHLC_PREFIX), &ohlc_json)
            .await;
        self.kv_set(&format!("{}{symbol}", keys::TICKER_PREFIX), &ticker_json)
            .await;

        let minute = minute_key(epoch_secs, self.session_offset_hours);
        if let Err(e) = self.kv.update_live_candle(symbol, price, qty, &minute).await {
            EngineMetrics::incr(&self.metrics.kv_errors);
            warn!(symbol, error = %e, "live candle update failed");
        }

        let trade = TradeRecord {
            symbol: symbol.to_string(),
            timestamp_ms: ts_ms,
            price,
            quantity: qty,
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            buyer_order: buyer_order.to_string(),
            seller_order: seller_order.to_string(),
        };
        if let Err(e) = self.trade_store.put_trade(&trade).await {
            warn!(symbol, error = %e, "trade store write skipped");
        }
    }

    // === depth ===

    async fn on_depth_change(&self, symbol: &str, depth: &Depth) {
        let (change_rate, prev_change_rate, last_price) = {
            let days = self.days.lock();
            days.get(symbol)
                .map(|d| (d.change_rate, d.prev_change_rate, d.last_price))
                .unwrap_or((0.0, 0.0, 0))
        };

        let bids: Vec<[u64; 2]> = depth
            .bids
            .iter()
            .take(DEPTH_WIRE_LEVELS)
            .map(|l| [l.price, l.aggregate_qty])
            .collect();
        let asks: Vec<[u64; 2]> = depth
            .asks
            .iter()
            .take(DEPTH_WIRE_LEVELS)
            .map(|l| [l.price, l.aggregate_qty])
            .collect();

        let record = json!({
            "e": "d",
            "s": symbol,
            "t": now_ms(),
            "b": bids,
            "a": asks,
            "c": change_rate,
            "yc": prev_change_rate,
            "p": last_price,
        })
        .to_string();

        self.kv_set(&format!("{}{symbol}", keys::DEPTH_PREFIX), &record).await;
        self.bus.publish(topics::DEPTH, symbol, record);
    }

    // === helpers ===

    async fn emit_status(&self, symbol: &str, order: &OrderHandle, status: &str, reason: &str) {
        let (order_id, user_id) = {
            let o = order.lock();
            (o.order_id.clone(), o.user_id.clone())
        };
        let ts = now_ms();
        debug!(symbol, %order_id, status, reason, "order status");

        let mut record = json!({
            "event": "ORDER_STATUS",
            "symbol": symbol,
            "order_id": order_id,
            "user_id": user_id,
            "status": status,
            "timestamp": ts,
        });
        if !reason.is_empty() {
            record["reason"] = json!(reason);
        }
        self.publish(topics::ORDER_STATUS, symbol, record);

        let mut data = json!({
            "order_id": order_id,
            "symbol": symbol,
            "status": status,
            "timestamp": ts,
        });
        if !reason.is_empty() {
            data["reason"] = json!(reason);
        }
        self.notifier
            .push(&user_id, json!({"type": "ORDER_STATUS", "data": data}));
    }

    fn publish(&self, topic: &str, symbol: &str, record: serde_json::Value) {
        self.bus.publish(topic, symbol, record.to_string());
    }

    async fn kv_set(&self, key: &str, value: &str) {
        if let Err(e) = self.kv.set(key, value).await {
            EngineMetrics::incr(&self.metrics.kv_errors);
            warn!(key, error = %e, "cache write skipped");
        }
    }
}
