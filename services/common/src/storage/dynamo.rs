//! DynamoDB-backed trade store and candle table

use super::{CandleRow, TradeRecord, TradeStore};
use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Trade and candle persistence over two DynamoDB tables.
///
/// Trades: `pk = TRADE#<symbol>#<YYYYMMDD>`, `sk = timestamp_ms`.
/// Candles: `pk = CANDLE#<symbol>#<interval>`, `sk = time_epoch`, merged
/// read-modify-write (a single aggregator owns each key, so the merge needs
/// no conditional write).
pub struct DynamoTradeStore {
    client: Client,
    trade_table: String,
    candle_table: String,
}

impl DynamoTradeStore {
    /// Build against the given region and table names
    pub async fn connect(region: &str, trade_table: &str, candle_table: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        debug!(region, trade_table, candle_table, "trade store connected");
        Self {
            client: Client::new(&config),
            trade_table: trade_table.to_string(),
            candle_table: candle_table.to_string(),
        }
    }

    async fn put_trade_once(&self, trade: &TradeRecord) -> EngineResult<()> {
        let date = trade
            .partition_key()
            .rsplit('#')
            .next()
            .unwrap_or_default()
            .to_string();
        self.client
            .put_item()
            .table_name(&self.trade_table)
            .item("pk", AttributeValue::S(trade.partition_key()))
            .item("sk", AttributeValue::N(trade.timestamp_ms.to_string()))
            .item("symbol", AttributeValue::S(trade.symbol.clone()))
            .item("price", AttributeValue::N(trade.price.to_string()))
            .item("quantity", AttributeValue::N(trade.quantity.to_string()))
            .item("timestamp", AttributeValue::N(trade.timestamp_ms.to_string()))
            .item("date", AttributeValue::S(date))
            .item("buyer_id", AttributeValue::S(trade.buyer_id.clone()))
            .item("seller_id", AttributeValue::S(trade.seller_id.clone()))
            .item("buyer_order", AttributeValue::S(trade.buyer_order.clone()))
            .item("seller_order", AttributeValue::S(trade.seller_order.clone()))
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;
        Ok(())
    }

    fn candle_pk(&self, symbol: &str, interval: &str) -> String {
        format!("CANDLE#{symbol}#{interval}")
    }

    async fn read_candle(
        &self,
        pk: &str,
        time_epoch: i64,
    ) -> EngineResult<Option<CandleRow>> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.candle_table)
            .key("pk", AttributeValue::S(pk.to_string()))
            .key("sk", AttributeValue::N(time_epoch.to_string()))
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        let Some(item) = resp.item() else {
            return Ok(None);
        };
        let num = |field: &str| -> f64 {
            item.get(field)
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0.0)
        };
        let time = item
            .get("time")
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();
        Ok(Some(CandleRow {
            time,
            time_epoch,
            open: num("open"),
            high: num("high"),
            low: num("low"),
            close: num("close"),
            volume: num("volume"),
        }))
    }

    async fn write_candle(&self, pk: &str, row: &CandleRow) -> EngineResult<()> {
        self.client
            .put_item()
            .table_name(&self.candle_table)
            .item("pk", AttributeValue::S(pk.to_string()))
            .item("sk", AttributeValue::N(row.time_epoch.to_string()))
            .item("time", AttributeValue::S(row.time.clone()))
            .item("open", AttributeValue::N(row.open.to_string()))
            .item("high", AttributeValue::N(row.high.to_string()))
            .item("low", AttributeValue::N(row.low.to_string()))
            .item("close", AttributeValue::N(row.close.to_string()))
            .item("volume", AttributeValue::N(row.volume.to_string()))
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for DynamoTradeStore {
    async fn put_trade(&self, trade: &TradeRecord) -> EngineResult<()> {
        // One inline retry with a short backoff; beyond that the write is
        // skipped and downstream consumers reconcile from the fills topic.
        match self.put_trade_once(trade).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(symbol = %trade.symbol, error = %first, "trade write failed, retrying");
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.put_trade_once(trade).await
            }
        }
    }

    async fn batch_put_candles(
        &self,
        symbol: &str,
        interval: &str,
        candles: &[CandleRow],
    ) -> EngineResult<usize> {
        let pk = self.candle_pk(symbol, interval);
        let mut saved = 0;
        for candle in candles {
            let merged = match self.read_candle(&pk, candle.time_epoch).await? {
                Some(mut stored) => {
                    stored.merge(candle);
                    stored
                }
                None => candle.clone(),
            };
            self.write_candle(&pk, &merged).await?;
            saved += 1;
        }
        Ok(saved)
    }
}
