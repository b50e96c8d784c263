//! Matching engine process entry point
//!
//! Wires the engine core, the market-data handler and the control-plane RPC
//! server together, restores cached snapshots at startup and keeps the
//! background loops (snapshot cadence, metrics report, day-boundary roll)
//! running until a shutdown signal arrives.

use anyhow::Result;
use matching_engine::book::SelfTradePolicy;
use matching_engine::consume::IntentConsumer;
use matching_engine::engine::EngineCore;
use matching_engine::market_data::MarketDataHandler;
use matching_engine::metrics::EngineMetrics;
use matching_engine::notifier::{LogSink, Notifier};
use matching_engine::rpc::EngineAdmin;
use services_common::kv::{Kv, RedisKv};
use services_common::proto::EngineAdminServiceServer;
use services_common::storage::DynamoTradeStore;
use services_common::stream::StreamBus;
use services_common::EngineConfig;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "matching-engine";
const METRICS_INTERVAL_SECS: u64 = 30;
const DAY_ROLL_CHECK_SECS: u64 = 30;
const NOTIFIER_DRAIN_BUDGET: Duration = Duration::from_secs(5);
const STREAM_BUS_CAPACITY: usize = 16384;

#[tokio::main]
async fn main() -> ExitCode {
    let mut config = EngineConfig::from_env();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--debug" => config.log_level = "debug".to_string(),
            "--help" => {
                println!("{SERVICE_NAME} [--debug] [--help]");
                println!("configuration is read from the environment; see EngineConfig");
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

async fn run(config: EngineConfig) -> Result<()> {
    info!(
        rpc_port = config.rpc_port,
        kv = %config.kv_url(),
        region = %config.aws_region,
        snapshot_interval_secs = config.snapshot_interval_secs,
        "starting {SERVICE_NAME} v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Cache is best-effort: the engine matches without it.
    let kv: Option<Arc<dyn Kv>> = match RedisKv::connect(&config.kv_url()).await {
        Ok(kv) => Some(Arc::new(kv)),
        Err(e) => {
            warn!(error = %e, "cache connection failed, continuing without cache");
            None
        }
    };

    let metrics = Arc::new(EngineMetrics::new());
    let bus = Arc::new(StreamBus::new(STREAM_BUS_CAPACITY));
    let (notifier, notifier_worker) = Notifier::start(
        config.notifier_capacity,
        Arc::new(LogSink),
        Arc::clone(&metrics),
    );

    let trade_store = Arc::new(
        DynamoTradeStore::connect(&config.aws_region, &config.trade_table, "candle_history").await,
    );

    let handler = Arc::new(MarketDataHandler::new(
        kv.clone()
            .unwrap_or_else(|| Arc::new(services_common::kv::MemoryKv::new())),
        trade_store,
        Arc::clone(&bus),
        Arc::clone(&notifier),
        Arc::clone(&metrics),
        config.session_offset_hours,
    ));

    let engine = Arc::new(EngineCore::new(
        Arc::clone(&handler),
        Arc::clone(&metrics),
        SelfTradePolicy::Allow,
    ));

    // Restart recovery: replay every cached snapshot before taking traffic.
    if let Some(kv) = &kv {
        let restored = engine.restore_all_from_kv(kv.as_ref()).await;
        info!(restored, "order books restored from cache");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Inbound consumer
    let consumer = IntentConsumer::new(Arc::clone(&engine), Arc::clone(&bus));
    let consumer_task = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(rx).await })
    };

    // Control-plane RPC
    let addr: SocketAddr = format!("0.0.0.0:{}", config.rpc_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid rpc address: {e}"))?;
    let admin = EngineAdmin::new(Arc::clone(&engine), kv.clone());
    let rpc_task = {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let result = Server::builder()
                .add_service(EngineAdminServiceServer::new(admin))
                .serve_with_shutdown(addr, async {
                    let _ = rx.changed().await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "rpc server error");
            }
        })
    };
    info!(%addr, "rpc server listening");

    // Background snapshot cadence
    let snapshot_task = kv.clone().map(|kv| {
        let engine = Arc::clone(&engine);
        let mut rx = shutdown_rx.clone();
        let interval_secs = config.snapshot_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let saved = engine.snapshot_all_to_kv(kv.as_ref()).await;
                        if saved > 0 {
                            info!(saved, "auto-saved order book snapshots");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    });

    // Day-boundary roll for symbols with no overnight trades
    let day_roll_task = {
        let handler = Arc::clone(&handler);
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(DAY_ROLL_CHECK_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => handler.roll_outdated_days().await,
                    _ = rx.changed() => break,
                }
            }
        })
    };

    // Periodic metrics report
    let metrics_task = {
        let metrics = Arc::clone(&metrics);
        let engine = Arc::clone(&engine);
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(METRICS_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let symbols = engine.symbol_count().await;
                        info!(
                            symbols = symbols,
                            report = %metrics.report(),
                            "metrics"
                        );
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    };

    info!("engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Ordered shutdown: stop intake, drain notifications, stop RPC, final
    // snapshot pass.
    let _ = shutdown_tx.send(true);
    let _ = consumer_task.await;
    notifier.drain(NOTIFIER_DRAIN_BUDGET).await;
    notifier.shutdown();
    let _ = notifier_worker.await;
    let _ = rpc_task.await;
    if let Some(task) = snapshot_task {
        let _ = task.await;
    }
    let _ = day_roll_task.await;
    let _ = metrics_task.await;

    if let Some(kv) = &kv {
        let saved = engine.snapshot_all_to_kv(kv.as_ref()).await;
        info!(saved, "final snapshots saved");
    }

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("matching_engine={level},tower=info,tonic=info,h2=info").into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
    Ok(())
}
