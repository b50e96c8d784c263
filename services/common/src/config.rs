//! Service configuration
//!
//! All settings come from the environment with workable local defaults;
//! `--debug` on either binary forces the log level down to `debug`.

use serde::{Deserialize, Serialize};
use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Matching engine process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Inbound order-intent stream endpoint
    pub inbound_endpoint: String,
    /// Outbound market-data stream endpoint
    pub outbound_endpoint: String,
    /// Cache host
    pub kv_host: String,
    /// Cache port
    pub kv_port: u16,
    /// Control-plane RPC port
    pub rpc_port: u16,
    /// AWS region for the durable stores
    pub aws_region: String,
    /// Log level (overridden by --debug)
    pub log_level: String,
    /// WebSocket push endpoint for user notifications
    pub websocket_endpoint: String,
    /// Session timezone offset from UTC in hours
    pub session_offset_hours: i64,
    /// Background snapshot cadence in seconds
    pub snapshot_interval_secs: u64,
    /// Durable trade table name
    pub trade_table: String,
    /// Notifier queue capacity
    pub notifier_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inbound_endpoint: "localhost:9092".to_string(),
            outbound_endpoint: "localhost:9092".to_string(),
            kv_host: "localhost".to_string(),
            kv_port: 6379,
            rpc_port: 50051,
            aws_region: "ap-northeast-2".to_string(),
            log_level: "info".to_string(),
            websocket_endpoint: String::new(),
            session_offset_hours: 9,
            snapshot_interval_secs: 10,
            trade_table: "trade_history".to_string(),
            notifier_capacity: 4096,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inbound_endpoint: env_or("INBOUND_STREAM_ENDPOINT", &defaults.inbound_endpoint),
            outbound_endpoint: env_or("OUTBOUND_STREAM_ENDPOINT", &defaults.outbound_endpoint),
            kv_host: env_or("KV_HOST", &defaults.kv_host),
            kv_port: env_parse("KV_PORT", defaults.kv_port),
            rpc_port: env_parse("RPC_PORT", defaults.rpc_port),
            aws_region: env_or("AWS_REGION", &defaults.aws_region),
            log_level: env_or("LOG_LEVEL", &defaults.log_level),
            websocket_endpoint: env_or("WEBSOCKET_ENDPOINT", &defaults.websocket_endpoint),
            session_offset_hours: env_parse("SESSION_OFFSET_HOURS", defaults.session_offset_hours),
            snapshot_interval_secs: env_parse(
                "SNAPSHOT_INTERVAL_SECS",
                defaults.snapshot_interval_secs,
            ),
            trade_table: env_or("TRADE_TABLE", &defaults.trade_table),
            notifier_capacity: env_parse("NOTIFIER_CAPACITY", defaults.notifier_capacity),
        }
    }

    /// Cache connection URL
    #[must_use]
    pub fn kv_url(&self) -> String {
        format!("redis://{}:{}", self.kv_host, self.kv_port)
    }
}

/// Candle aggregator process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Cache host
    pub kv_host: String,
    /// Cache port
    pub kv_port: u16,
    /// AWS region for the durable stores
    pub aws_region: String,
    /// Log level (overridden by --debug)
    pub log_level: String,
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Session timezone offset from UTC in hours
    pub session_offset_hours: i64,
    /// Durable candle table name
    pub candle_table: String,
    /// Cold storage bucket for hourly archives
    pub blob_bucket: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            kv_host: "localhost".to_string(),
            kv_port: 6379,
            aws_region: "ap-northeast-2".to_string(),
            log_level: "info".to_string(),
            poll_interval_ms: 1000,
            session_offset_hours: 9,
            candle_table: "candle_history".to_string(),
            blob_bucket: "market-data".to_string(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from the environment
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            kv_host: env_or("KV_HOST", &defaults.kv_host),
            kv_port: env_parse("KV_PORT", defaults.kv_port),
            aws_region: env_or("AWS_REGION", &defaults.aws_region),
            log_level: env_or("LOG_LEVEL", &defaults.log_level),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            session_offset_hours: env_parse("SESSION_OFFSET_HOURS", defaults.session_offset_hours),
            candle_table: env_or("CANDLE_TABLE", &defaults.candle_table),
            blob_bucket: env_or("S3_BUCKET", &defaults.blob_bucket),
        }
    }

    /// Cache connection URL
    #[must_use]
    pub fn kv_url(&self) -> String {
        format!("redis://{}:{}", self.kv_host, self.kv_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.rpc_port, 50051);
        assert_eq!(cfg.session_offset_hours, 9);
        assert_eq!(cfg.snapshot_interval_secs, 10);
        assert_eq!(cfg.kv_url(), "redis://localhost:6379");
    }

    #[test]
    fn test_aggregator_defaults() {
        let cfg = AggregatorConfig::default();
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert_eq!(cfg.candle_table, "candle_history");
    }
}
