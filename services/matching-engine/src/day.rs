//! Per-symbol session day aggregate

use serde::{Deserialize, Serialize};
use serde_json::json;
use services_common::{Price, Quantity, Symbol};

/// Session OHLC, volume and change rate for one symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayAggregate {
    /// First trade price of the day; set exactly once per trading day
    pub open_price: Price,
    /// Session high
    pub high_price: Price,
    /// Session low
    pub low_price: Price,
    /// Last trade price
    pub last_price: Price,
    /// Session volume
    pub volume: Quantity,
    /// `(last - open) / open * 100`, percent
    pub change_rate: f64,
    /// Final change rate of the previous trading day
    pub prev_change_rate: f64,
    /// `YYYYMMDD` session date this aggregate covers
    pub trading_day: String,
}

/// Prior-day record persisted to `prev:<symbol>` on rollover
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrevDayRecord {
    /// Symbol
    pub symbol: Symbol,
    /// Session date the record covers
    pub date: String,
    /// Day open
    pub open: Price,
    /// Day high
    pub high: Price,
    /// Day low
    pub low: Price,
    /// Day close (last trade)
    pub close: Price,
    /// Final change rate
    pub change_rate: f64,
}

impl DayAggregate {
    /// Start an empty aggregate for `trading_day`
    #[must_use]
    pub fn new(trading_day: impl Into<String>) -> Self {
        Self {
            trading_day: trading_day.into(),
            ..Self::default()
        }
    }

    /// Whether `today` has moved past this aggregate's session
    #[must_use]
    pub fn needs_roll(&self, today: &str) -> bool {
        !self.trading_day.is_empty() && self.trading_day != today
    }

    /// Fold one execution into the session.
    pub fn apply_trade(&mut self, price: Price, qty: Quantity) {
        if self.open_price == 0 {
            self.open_price = price;
            self.high_price = price;
            self.low_price = price;
        } else {
            if price > self.high_price {
                self.high_price = price;
            }
            if price < self.low_price {
                self.low_price = price;
            }
        }
        self.last_price = price;
        self.volume += qty;
        if self.open_price > 0 {
            self.change_rate = (self.last_price as f64 - self.open_price as f64)
                / self.open_price as f64
                * 100.0;
        }
    }

    /// Close this session and start `new_day`.
    ///
    /// Returns the record for `prev:<symbol>`; the closing change rate
    /// carries over as `prev_change_rate` of the fresh session.
    pub fn roll(&mut self, symbol: &str, new_day: &str) -> PrevDayRecord {
        let record = PrevDayRecord {
            symbol: symbol.to_string(),
            date: self.trading_day.clone(),
            open: self.open_price,
            high: self.high_price,
            low: self.low_price,
            close: self.last_price,
            change_rate: self.change_rate,
        };
        *self = Self {
            prev_change_rate: self.change_rate,
            trading_day: new_day.to_string(),
            ..Self::default()
        };
        record
    }

    /// Compact JSON for `ohlc:<symbol>`
    #[must_use]
    pub fn ohlc_json(&self, symbol: &str, timestamp_ms: i64) -> String {
        json!({
            "symbol": symbol,
            "open": self.open_price,
            "high": self.high_price,
            "low": self.low_price,
            "close": self.last_price,
            "volume": self.volume,
            "change_rate": self.change_rate,
            "prev_change_rate": self.prev_change_rate,
            "trading_day": self.trading_day,
            "timestamp": timestamp_ms,
        })
        .to_string()
    }

    /// Compact JSON for `ticker:<symbol>`
    #[must_use]
    pub fn ticker_json(&self, symbol: &str, timestamp_ms: i64) -> String {
        json!({
            "symbol": symbol,
            "price": self.last_price,
            "change_rate": self.change_rate,
            "volume": self.volume,
            "timestamp": timestamp_ms,
        })
        .to_string()
    }
}
