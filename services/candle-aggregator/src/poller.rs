//! The aggregation tick loop
//!
//! Every tick: list symbols with closed 1m candles, skip the ones whose
//! buffer has not grown, roll the rest up into every timeframe, upsert the
//! results durably and archive complete hours to cold storage. The buffer is
//! trimmed from the tail by exactly the number of archived bars — never
//! deleted wholesale, so the still-open hour survives.

use crate::{aggregate, Candle};
use rustc_hash::FxHashMap;
use services_common::constants::{keys, CANDLES_PER_HOUR};
use services_common::kv::Kv;
use services_common::storage::{BlobStore, TradeStore};
use services_common::EngineResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Polling aggregator over the closed-candle buffers
pub struct AggregatorLoop {
    kv: Arc<dyn Kv>,
    trade_store: Arc<dyn TradeStore>,
    blob_store: Arc<dyn BlobStore>,
    session_offset_hours: i64,
    /// Buffer length seen at the last tick, to skip unchanged symbols
    last_seen_counts: FxHashMap<String, usize>,
}

impl AggregatorLoop {
    /// Wire the loop to its stores
    pub fn new(
        kv: Arc<dyn Kv>,
        trade_store: Arc<dyn TradeStore>,
        blob_store: Arc<dyn BlobStore>,
        session_offset_hours: i64,
    ) -> Self {
        Self {
            kv,
            trade_store,
            blob_store,
            session_offset_hours,
            last_seen_counts: FxHashMap::default(),
        }
    }

    /// Run until `shutdown` fires, ticking every `poll_interval`
    pub async fn run(
        &mut self,
        poll_interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_ms = poll_interval.as_millis() as u64, "aggregator running");
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "aggregation tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("aggregator stopped");
    }

    /// One polling pass over every symbol with closed candles
    pub async fn tick(&mut self) -> EngineResult<()> {
        let pattern = format!("{}*", keys::CANDLE_CLOSED_PREFIX);
        let buffer_keys = self.kv.keys(&pattern).await?;

        for key in buffer_keys {
            let symbol = key
                .trim_start_matches(keys::CANDLE_CLOSED_PREFIX)
                .to_string();
            if let Err(e) = self.process_symbol(&symbol, &key).await {
                warn!(%symbol, error = %e, "symbol aggregation skipped");
            }
        }
        Ok(())
    }

    async fn process_symbol(&mut self, symbol: &str, key: &str) -> EngineResult<()> {
        // Newest at head; decode tolerantly.
        let raw = self.kv.lrange(key, 0, -1).await?;
        if raw.is_empty() {
            self.last_seen_counts.insert(symbol.to_string(), 0);
            return Ok(());
        }

        let closed: Vec<Candle> = raw
            .iter()
            .filter_map(|entry| Candle::from_closed_json(symbol, entry))
            .collect();

        // Fast-poll guard: nothing new since the previous tick.
        if self.last_seen_counts.get(symbol) == Some(&closed.len()) {
            return Ok(());
        }
        self.last_seen_counts
            .insert(symbol.to_string(), closed.len());

        debug!(symbol, count = closed.len(), "processing closed 1m candles");

        // Timeframe rollup; durable upserts are idempotent so every tick can
        // re-put the same incomplete-hour bars safely.
        let rolled = aggregate(&closed);
        for (interval, bars) in &rolled {
            let rows: Vec<_> = bars
                .iter()
                .map(|bar| bar.to_row(self.session_offset_hours))
                .collect();
            let saved = self
                .trade_store
                .batch_put_candles(symbol, interval, &rows)
                .await?;
            debug!(symbol, interval, saved, "candles upserted");
        }

        // Archival: only once a full hour has accumulated.
        if closed.len() >= CANDLES_PER_HOUR {
            let archived = self.archive_complete_hours(symbol, &closed).await;
            if archived > 0 {
                // Drop exactly the archived oldest entries from the tail:
                // LTRIM key 0 -(archived+1).
                self.kv.ltrim(key, 0, -(archived as i64 + 1)).await?;
                self.last_seen_counts
                    .insert(symbol.to_string(), closed.len() - archived);
                info!(symbol, archived, "archived and trimmed closed candles");
            }
        }

        Ok(())
    }

    /// Archive every complete clock hour to cold storage; returns how many
    /// 1m bars were archived.
    async fn archive_complete_hours(&self, symbol: &str, closed: &[Candle]) -> usize {
        let mut hourly: BTreeMap<String, Vec<Candle>> = BTreeMap::new();
        for candle in closed {
            hourly
                .entry(candle.hour_key().to_string())
                .or_default()
                .push(candle.clone());
        }

        let mut archived = 0;
        for (hour, mut bars) in hourly {
            if bars.len() < CANDLES_PER_HOUR {
                debug!(symbol, %hour, count = bars.len(), "hour still open, waiting");
                continue;
            }
            bars.sort_by(|a, b| a.time.cmp(&b.time));
            let rows: Vec<_> = bars
                .iter()
                .map(|bar| bar.to_row(self.session_offset_hours))
                .collect();
            match self.blob_store.put_candles(symbol, "1m", &hour, &rows).await {
                Ok(()) => {
                    info!(symbol, %hour, count = bars.len(), "hour archived");
                    archived += bars.len();
                }
                Err(e) => {
                    // Trim is skipped for this hour; the next tick retries it
                    // and the durable upserts absorb the replay.
                    warn!(symbol, %hour, error = %e, "hour archive failed");
                }
            }
        }
        archived
    }
}
