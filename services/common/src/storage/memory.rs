//! In-memory storage doubles for the test suites

use super::{blob_key, BlobStore, CandleRow, TradeRecord, TradeStore};
use crate::errors::EngineResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Trade store double: keeps every trade and merges candle upserts with the
/// same policy as the durable table.
#[derive(Default)]
pub struct MemoryTradeStore {
    trades: Mutex<Vec<TradeRecord>>,
    candles: Mutex<FxHashMap<(String, String, i64), CandleRow>>,
}

impl MemoryTradeStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded trades, in insertion order
    #[must_use]
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().clone()
    }

    /// Stored candle row for `(symbol, interval, time_epoch)`
    #[must_use]
    pub fn candle(&self, symbol: &str, interval: &str, time_epoch: i64) -> Option<CandleRow> {
        self.candles
            .lock()
            .get(&(symbol.to_string(), interval.to_string(), time_epoch))
            .cloned()
    }

    /// Number of stored candle rows
    #[must_use]
    pub fn candle_count(&self) -> usize {
        self.candles.lock().len()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn put_trade(&self, trade: &TradeRecord) -> EngineResult<()> {
        self.trades.lock().push(trade.clone());
        Ok(())
    }

    async fn batch_put_candles(
        &self,
        symbol: &str,
        interval: &str,
        candles: &[CandleRow],
    ) -> EngineResult<usize> {
        let mut stored = self.candles.lock();
        for candle in candles {
            let key = (symbol.to_string(), interval.to_string(), candle.time_epoch);
            stored
                .entry(key)
                .and_modify(|existing| existing.merge(candle))
                .or_insert_with(|| candle.clone());
        }
        Ok(candles.len())
    }
}

/// Blob store double keyed by object path
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<FxHashMap<String, Vec<CandleRow>>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored object at `candles/<interval>/<symbol>/<hour>.json`
    #[must_use]
    pub fn object(&self, symbol: &str, interval: &str, hour_key: &str) -> Option<Vec<CandleRow>> {
        self.objects
            .lock()
            .get(&blob_key(symbol, interval, hour_key))
            .cloned()
    }

    /// Number of archived objects
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_candles(
        &self,
        symbol: &str,
        interval: &str,
        hour_key: &str,
        candles: &[CandleRow],
    ) -> EngineResult<()> {
        self.objects
            .lock()
            .insert(blob_key(symbol, interval, hour_key), candles.to_vec());
        Ok(())
    }
}
