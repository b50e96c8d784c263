//! Durable storage seams: trade store, candle table, cold blob archive
//!
//! The engine records every execution through [`TradeStore::put_trade`]; the
//! aggregator upserts rolled-up bars through [`TradeStore::batch_put_candles`]
//! and archives complete hours through [`BlobStore::put_candles`]. Candle
//! upserts merge (`high <- max`, `low <- min`, `close <- new`,
//! `volume <- sum`) so replaying a batch is harmless.

mod dynamo;
mod memory;
mod s3;

pub use dynamo::DynamoTradeStore;
pub use memory::{MemoryBlobStore, MemoryTradeStore};
pub use s3::S3BlobStore;

use crate::errors::EngineResult;
use crate::types::{Price, Quantity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One durable trade row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Trading symbol
    pub symbol: String,
    /// Execution time in ms since epoch (the sort key)
    pub timestamp_ms: i64,
    /// Execution price in ticks
    pub price: Price,
    /// Executed quantity
    pub quantity: Quantity,
    /// Buying user
    pub buyer_id: String,
    /// Selling user
    pub seller_id: String,
    /// Buy-side order id
    pub buyer_order: String,
    /// Sell-side order id
    pub seller_order: String,
}

impl TradeRecord {
    /// Partition key: `TRADE#<symbol>#<YYYYMMDD>` (UTC date)
    #[must_use]
    pub fn partition_key(&self) -> String {
        let date = chrono::DateTime::from_timestamp_millis(self.timestamp_ms)
            .map(|dt| dt.format("%Y%m%d").to_string())
            .unwrap_or_default();
        format!("TRADE#{}#{date}", self.symbol)
    }
}

/// One durable candle row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRow {
    /// Session-local minute key `YYYYMMDDHHmm`
    pub time: String,
    /// UTC epoch seconds derived from the minute key
    pub time_epoch: i64,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl CandleRow {
    /// Fold another observation of the same bar into this row: bounds widen,
    /// close is replaced, volume sums.
    pub fn merge(&mut self, other: &CandleRow) {
        self.high = self.high.max(other.high);
        self.low = self.low.min(other.low);
        self.close = other.close;
        self.volume += other.volume;
    }
}

/// Durable trade and candle persistence
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Record one execution
    async fn put_trade(&self, trade: &TradeRecord) -> EngineResult<()>;

    /// Upsert a batch of candles for `(symbol, interval)`, merging with any
    /// stored row at the same `time_epoch`. Returns the number of rows
    /// written.
    async fn batch_put_candles(
        &self,
        symbol: &str,
        interval: &str,
        candles: &[CandleRow],
    ) -> EngineResult<usize>;
}

/// Cold object archive for complete hours of 1m bars
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write one object per `(symbol, hour)` containing the full hour of
    /// bars in ascending time order.
    async fn put_candles(
        &self,
        symbol: &str,
        interval: &str,
        hour_key: &str,
        candles: &[CandleRow],
    ) -> EngineResult<()>;
}

/// Object path for an hourly archive: `candles/<interval>/<symbol>/<YYYYMMDDHH>.json`
#[must_use]
pub fn blob_key(symbol: &str, interval: &str, hour_key: &str) -> String {
    format!("candles/{interval}/{symbol}/{hour_key}.json")
}
