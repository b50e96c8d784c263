//! Candle aggregator process entry point

use anyhow::Result;
use candle_aggregator::poller::AggregatorLoop;
use services_common::kv::RedisKv;
use services_common::storage::{DynamoTradeStore, S3BlobStore};
use services_common::AggregatorConfig;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "candle-aggregator";

#[tokio::main]
async fn main() -> ExitCode {
    let mut config = AggregatorConfig::from_env();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--debug" => config.log_level = "debug".to_string(),
            "--help" => {
                println!("{SERVICE_NAME} [--debug] [--help]");
                println!("configuration is read from the environment; see AggregatorConfig");
                return ExitCode::SUCCESS;
            }
            other => {
                eprintln!("unknown flag: {other}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("failed to initialise tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AggregatorConfig) -> Result<()> {
    info!(
        kv = %config.kv_url(),
        table = %config.candle_table,
        bucket = %config.blob_bucket,
        poll_interval_ms = config.poll_interval_ms,
        "starting {SERVICE_NAME} v{}",
        env!("CARGO_PKG_VERSION")
    );

    // The aggregator is nothing without its buffer: a missing cache is fatal
    // here, unlike in the engine.
    let kv = Arc::new(
        RedisKv::connect(&config.kv_url())
            .await
            .map_err(|e| anyhow::anyhow!("cache connection failed: {e}"))?,
    );
    let trade_store = Arc::new(
        DynamoTradeStore::connect(&config.aws_region, "trade_history", &config.candle_table).await,
    );
    let blob_store = Arc::new(S3BlobStore::connect(&config.aws_region, &config.blob_bucket).await);

    let mut aggregator = AggregatorLoop::new(kv, trade_store, blob_store, config.session_offset_hours);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_task = tokio::spawn(async move {
        aggregator
            .run(Duration::from_millis(config.poll_interval_ms.max(100)), shutdown_rx)
            .await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = loop_task.await;

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("candle_aggregator={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
    Ok(())
}
