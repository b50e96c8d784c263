//! Multi-symbol engine core: registry, serialized command entry, snapshots
//!
//! Every mutating operation takes the single engine lock for the duration of
//! the call including the listener dispatch it triggers, so events for one
//! symbol reach the sinks in matching order. Cross-symbol ordering is not
//! preserved and not needed.

use crate::book::{OrderBook, SelfTradePolicy};
use crate::market_data::MarketDataHandler;
use crate::metrics::EngineMetrics;
use crate::order::{Order, OrderHandle};
use crate::snapshot::BookSnapshot;
use rustc_hash::FxHashMap;
use services_common::constants::keys;
use services_common::kv::Kv;
use services_common::time::now_ms;
use services_common::{EngineError, EngineResult, OrderId, Price, Symbol};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct EngineState {
    books: FxHashMap<Symbol, OrderBook>,
    order_maps: FxHashMap<Symbol, FxHashMap<OrderId, OrderHandle>>,
}

impl EngineState {
    fn book_and_map(
        &mut self,
        symbol: &str,
        policy: SelfTradePolicy,
    ) -> (&mut OrderBook, &mut FxHashMap<OrderId, OrderHandle>) {
        let book = self
            .books
            .entry(symbol.to_string())
            .or_insert_with(|| OrderBook::with_policy(symbol.to_string(), policy));
        let map = self.order_maps.entry(symbol.to_string()).or_default();
        (book, map)
    }

    /// Drop handles whose orders went terminal during the last operation
    fn prune_terminal(&mut self, symbol: &str) {
        if let Some(map) = self.order_maps.get_mut(symbol) {
            map.retain(|_, handle| !handle.lock().status.is_terminal());
        }
    }
}

/// The engine: books, order index and the serialized dispatch path
pub struct EngineCore {
    state: Mutex<EngineState>,
    handler: Arc<MarketDataHandler>,
    policy: SelfTradePolicy,
    orders_processed: AtomicU64,
    metrics: Arc<EngineMetrics>,
}

impl EngineCore {
    /// Build an engine dispatching into `handler`
    pub fn new(
        handler: Arc<MarketDataHandler>,
        metrics: Arc<EngineMetrics>,
        policy: SelfTradePolicy,
    ) -> Self {
        Self {
            state: Mutex::new(EngineState {
                books: FxHashMap::default(),
                order_maps: FxHashMap::default(),
            }),
            handler,
            policy,
            orders_processed: AtomicU64::new(0),
            metrics,
        }
    }

    /// Shared metrics handle
    #[must_use]
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Orders that entered the dispatch path
    #[must_use]
    pub fn orders_processed(&self) -> u64 {
        self.orders_processed.load(Ordering::Relaxed)
    }

    /// Admit one order. Fails when the id already exists for the symbol.
    pub async fn add_order(&self, order: Order) -> EngineResult<()> {
        let symbol = order.symbol.clone();
        let mut state = self.state.lock().await;
        let (book, map) = state.book_and_map(&symbol, self.policy);

        if map.contains_key(&order.order_id) {
            return Err(EngineError::InvalidInput(format!(
                "duplicate order id {} for {symbol}",
                order.order_id
            )));
        }

        let handle = order.into_handle();
        map.insert(handle.lock().order_id.clone(), handle.clone());
        book.add(handle);
        let events = book.take_events();
        state.prune_terminal(&symbol);
        self.orders_processed.fetch_add(1, Ordering::Relaxed);

        self.handler.on_events(&symbol, events).await;
        Ok(())
    }

    /// Cancel by id. Unknown orders fail silently with `false`.
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(handle) = state
            .order_maps
            .get(symbol)
            .and_then(|map| map.get(order_id))
            .cloned()
        else {
            warn!(symbol, order_id, "cancel failed, order not found");
            return false;
        };

        let Some(book) = state.books.get_mut(symbol) else {
            return false;
        };
        book.cancel(handle);
        let events = book.take_events();
        state.prune_terminal(symbol);

        self.handler.on_events(symbol, events).await;
        true
    }

    /// Replace by id. Unknown orders fail silently with `false`.
    pub async fn replace_order(
        &self,
        symbol: &str,
        order_id: &str,
        qty_delta: i64,
        new_price: Price,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(handle) = state
            .order_maps
            .get(symbol)
            .and_then(|map| map.get(order_id))
            .cloned()
        else {
            warn!(symbol, order_id, "replace failed, order not found");
            return false;
        };

        let Some(book) = state.books.get_mut(symbol) else {
            return false;
        };
        book.replace(handle, qty_delta, new_price);
        let events = book.take_events();
        state.prune_terminal(symbol);

        self.handler.on_events(symbol, events).await;
        true
    }

    /// Serialize one book's resting orders. Empty or unknown books yield an
    /// empty string.
    pub async fn snapshot_order_book(&self, symbol: &str) -> String {
        let state = self.state.lock().await;
        let Some(map) = state.order_maps.get(symbol) else {
            return String::new();
        };

        let mut orders: Vec<Order> = map
            .values()
            .map(|handle| handle.lock().clone())
            .filter(|order| order.open_qty() > 0)
            .collect();
        if orders.is_empty() {
            return String::new();
        }
        // Deterministic replay order preserving time priority
        orders.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });

        let count = orders.len();
        match BookSnapshot::new(symbol, now_ms(), orders).encode() {
            Ok(data) => {
                info!(symbol, orders = count, "snapshot created");
                data
            }
            Err(e) => {
                warn!(symbol, error = %e, "snapshot encode failed");
                String::new()
            }
        }
    }

    /// Rebuild a book from a snapshot payload, replacing any current book.
    ///
    /// Re-adding runs the normal matching path, so depth (and in pathological
    /// cases fill) events fire; downstream sinks are idempotent on order id
    /// and minute key.
    pub async fn restore_order_book(&self, symbol: &str, data: &str) -> EngineResult<()> {
        let snapshot = BookSnapshot::decode(data)?;

        let mut state = self.state.lock().await;
        state.books.remove(symbol);
        state.order_maps.remove(symbol);

        let (book, map) = state.book_and_map(symbol, self.policy);
        let mut events = Vec::new();
        for order in snapshot.orders {
            let handle = order.into_handle();
            map.insert(handle.lock().order_id.clone(), handle.clone());
            book.add(handle);
            events.extend(book.take_events());
        }
        state.prune_terminal(symbol);
        info!(symbol, "order book restored");

        self.handler.on_events(symbol, events).await;
        Ok(())
    }

    /// Drop a book and its index
    pub async fn remove_order_book(&self, symbol: &str) -> bool {
        let mut state = self.state.lock().await;
        state.books.remove(symbol);
        state.order_maps.remove(symbol);
        info!(symbol, "order book removed");
        true
    }

    /// Symbols with live books
    pub async fn all_symbols(&self) -> Vec<Symbol> {
        let state = self.state.lock().await;
        state.books.keys().cloned().collect()
    }

    /// Number of live books
    pub async fn symbol_count(&self) -> usize {
        self.state.lock().await.books.len()
    }

    /// Indexed orders for one symbol
    pub async fn order_count(&self, symbol: &str) -> usize {
        let state = self.state.lock().await;
        state.order_maps.get(symbol).map_or(0, |map| map.len())
    }

    /// Indexed orders across all symbols
    pub async fn total_order_count(&self) -> usize {
        let state = self.state.lock().await;
        state.order_maps.values().map(|map| map.len()).sum()
    }

    /// Current top-10 depth for one symbol (empty when unknown)
    pub async fn depth_of(&self, symbol: &str) -> crate::depth::Depth {
        let state = self.state.lock().await;
        state
            .books
            .get(symbol)
            .map(OrderBook::depth)
            .unwrap_or_default()
    }

    /// Snapshot every active symbol into the cache, with a freshness stamp.
    /// Runs on the background cadence and once more on shutdown.
    pub async fn snapshot_all_to_kv(&self, kv: &dyn Kv) -> usize {
        let symbols = self.all_symbols().await;
        let mut saved = 0;
        for symbol in symbols {
            let data = self.snapshot_order_book(&symbol).await;
            if data.is_empty() {
                continue;
            }
            let key = format!("{}{symbol}", keys::SNAPSHOT_PREFIX);
            let ts_key = format!("{key}{}", keys::SNAPSHOT_TS_SUFFIX);
            if let Err(e) = kv.set(&key, &data).await {
                warn!(symbol, error = %e, "snapshot write failed");
                continue;
            }
            if let Err(e) = kv.set(&ts_key, &now_ms().to_string()).await {
                warn!(symbol, error = %e, "snapshot timestamp write failed");
            }
            saved += 1;
        }
        saved
    }

    /// Restore every `snapshot:*` key found in the cache. Used at startup.
    pub async fn restore_all_from_kv(&self, kv: &dyn Kv) -> usize {
        let pattern = format!("{}*", keys::SNAPSHOT_PREFIX);
        let Ok(snapshot_keys) = kv.keys(&pattern).await else {
            return 0;
        };
        let mut restored = 0;
        for key in snapshot_keys {
            if key.ends_with(keys::SNAPSHOT_TS_SUFFIX) {
                continue;
            }
            let symbol = key.trim_start_matches(keys::SNAPSHOT_PREFIX).to_string();
            match kv.get(&key).await {
                Ok(Some(data)) => {
                    if let Err(e) = self.restore_order_book(&symbol, &data).await {
                        warn!(symbol, error = %e, "snapshot restore failed");
                    } else {
                        restored += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(symbol, error = %e, "snapshot read failed"),
            }
        }
        restored
    }
}
