//! Candle aggregation: 1m bars rolled into higher timeframes
//!
//! The engine closes 1-minute candles onto a cache list; this crate groups
//! them by timeframe boundary, emits only complete windows, upserts the
//! results into the durable candle table and archives complete hours to cold
//! storage. See [`poller::AggregatorLoop`] for the polling control flow.

pub mod poller;

use serde::{Deserialize, Serialize};
use services_common::storage::CandleRow;
use services_common::time::minute_key_to_epoch;
use std::collections::BTreeMap;
use tracing::warn;

/// One 1-minute bar decoded from the closed-candle list.
///
/// The cache stores hash fields as strings, so numeric fields accept either
/// JSON strings or numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Symbol
    pub symbol: String,
    /// Session-local minute key `YYYYMMDDHHmm`
    pub time: String,
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

impl Candle {
    /// Decode one entry of `candle:closed:1m:<symbol>`.
    ///
    /// Entries with a missing or malformed minute key are dropped with a
    /// warning; one bad record must not stall the whole buffer.
    #[must_use]
    pub fn from_closed_json(symbol: &str, raw: &str) -> Option<Self> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(symbol, error = %e, "failed to parse closed candle");
                return None;
            }
        };
        let time = value.get("t")?.as_str()?.to_string();
        if time.len() < 12 {
            return None;
        }
        let num = |field: &str| -> f64 {
            match value.get(field) {
                Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0.0),
                _ => 0.0,
            }
        };
        Some(Self {
            symbol: symbol.to_string(),
            time,
            open: num("o"),
            high: num("h"),
            low: num("l"),
            close: num("c"),
            volume: num("v"),
        })
    }

    /// Durable-table row for this bar, with the epoch derived from the
    /// minute key in the configured session zone.
    #[must_use]
    pub fn to_row(&self, session_offset_hours: i64) -> CandleRow {
        CandleRow {
            time: self.time.clone(),
            time_epoch: minute_key_to_epoch(&self.time, session_offset_hours),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }

    /// `YYYYMMDDHH` archival hour bucket
    #[must_use]
    pub fn hour_key(&self) -> &str {
        &self.time[..10]
    }
}

/// One aggregation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
    /// Interval label used in table keys (`5m`, `1h`, ...)
    pub interval: &'static str,
    /// Window length in minutes
    pub minutes: u32,
}

/// Timeframes produced on every tick. 1m passes through unchanged.
pub const TIMEFRAMES: &[Timeframe] = &[
    Timeframe { interval: "1m", minutes: 1 },
    Timeframe { interval: "5m", minutes: 5 },
    Timeframe { interval: "15m", minutes: 15 },
    Timeframe { interval: "1h", minutes: 60 },
    Timeframe { interval: "4h", minutes: 240 },
];

/// Align a minute key down to a timeframe boundary.
///
/// Works across hour boundaries (4h windows and up) by flattening to minutes
/// since midnight before flooring.
#[must_use]
pub fn align_to_timeframe(ymdhm: &str, minutes: u32) -> String {
    if ymdhm.len() < 12 || minutes == 0 {
        return ymdhm.to_string();
    }
    let hour: u32 = ymdhm[8..10].parse().unwrap_or(0);
    let min: u32 = ymdhm[10..12].parse().unwrap_or(0);

    let total_min = hour * 60 + min;
    let aligned_total = (total_min / minutes) * minutes;

    format!("{}{:02}{:02}", &ymdhm[..8], aligned_total / 60, aligned_total % 60)
}

/// Collapse a sorted-ascending group into one bar at `aligned_time`
fn aggregate_window(sorted: &[Candle], aligned_time: &str) -> Candle {
    let first = &sorted[0];
    let last = &sorted[sorted.len() - 1];
    let mut high = first.high;
    let mut low = first.low;
    let mut volume = 0.0;
    for candle in sorted {
        if candle.high > high {
            high = candle.high;
        }
        if candle.low < low {
            low = candle.low;
        }
        volume += candle.volume;
    }
    Candle {
        symbol: first.symbol.clone(),
        time: aligned_time.to_string(),
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
    }
}

/// Roll 1m candles up into every target timeframe.
///
/// A window is emitted only when it is complete: the group holds at least as
/// many 1m bars as the timeframe has minutes. Partial windows stay in the
/// buffer for a later tick.
#[must_use]
pub fn aggregate(one_min: &[Candle]) -> BTreeMap<&'static str, Vec<Candle>> {
    let mut result = BTreeMap::new();
    if one_min.is_empty() {
        return result;
    }

    result.insert("1m", one_min.to_vec());

    for tf in TIMEFRAMES {
        if tf.minutes <= 1 {
            continue;
        }

        let mut groups: BTreeMap<String, Vec<Candle>> = BTreeMap::new();
        for candle in one_min {
            let aligned = align_to_timeframe(&candle.time, tf.minutes);
            groups.entry(aligned).or_default().push(candle.clone());
        }

        let mut bars = Vec::new();
        for (aligned_time, mut group) in groups {
            if group.len() >= tf.minutes as usize {
                group.sort_by(|a, b| a.time.cmp(&b.time));
                bars.push(aggregate_window(&group, &aligned_time));
            }
        }
        if !bars.is_empty() {
            result.insert(tf.interval, bars);
        }
    }

    result
}
