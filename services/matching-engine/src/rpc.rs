//! Control-plane RPC service

use crate::engine::EngineCore;
use crate::metrics::EngineMetrics;
use services_common::constants::keys;
use services_common::kv::Kv;
use services_common::proto::{
    EngineAdminService, HealthRequest, HealthResponse, RemoveRequest, RemoveResponse,
    RestoreRequest, RestoreResponse, SnapshotRequest, SnapshotResponse,
};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};
use tracing::info;

/// Admin surface over the engine: snapshot, restore, remove, health
pub struct EngineAdmin {
    engine: Arc<EngineCore>,
    kv: Option<Arc<dyn Kv>>,
    started_at: Instant,
}

impl EngineAdmin {
    /// Build the service; `kv` is optional so the engine can run cache-less
    pub fn new(engine: Arc<EngineCore>, kv: Option<Arc<dyn Kv>>) -> Self {
        Self {
            engine,
            kv,
            started_at: Instant::now(),
        }
    }
}

#[tonic::async_trait]
impl EngineAdminService for EngineAdmin {
    async fn create_snapshot(
        &self,
        request: Request<SnapshotRequest>,
    ) -> Result<Response<SnapshotResponse>, Status> {
        let symbol = request.into_inner().symbol;
        info!(%symbol, "rpc create snapshot");

        let data = self.engine.snapshot_order_book(&symbol).await;
        if data.is_empty() {
            return Ok(Response::new(SnapshotResponse {
                success: false,
                data: String::new(),
                error: "symbol not found or empty orderbook".to_string(),
            }));
        }

        if let Some(kv) = &self.kv {
            let key = format!("{}{symbol}", keys::SNAPSHOT_PREFIX);
            let ts_key = format!("{key}{}", keys::SNAPSHOT_TS_SUFFIX);
            let _ = kv.set(&key, &data).await;
            let _ = kv
                .set(&ts_key, &services_common::time::now_ms().to_string())
                .await;
        }

        Ok(Response::new(SnapshotResponse {
            success: true,
            data,
            error: String::new(),
        }))
    }

    async fn restore_snapshot(
        &self,
        request: Request<RestoreRequest>,
    ) -> Result<Response<RestoreResponse>, Status> {
        let req = request.into_inner();
        info!(symbol = %req.symbol, "rpc restore snapshot");

        let mut data = req.data;
        if data.is_empty() {
            if let Some(kv) = &self.kv {
                let key = format!("{}{}", keys::SNAPSHOT_PREFIX, req.symbol);
                if let Ok(Some(cached)) = kv.get(&key).await {
                    data = cached;
                }
            }
        }
        if data.is_empty() {
            return Ok(Response::new(RestoreResponse {
                success: false,
                error: "no snapshot data provided or found in cache".to_string(),
            }));
        }

        match self.engine.restore_order_book(&req.symbol, &data).await {
            Ok(()) => Ok(Response::new(RestoreResponse {
                success: true,
                error: String::new(),
            })),
            Err(e) => Ok(Response::new(RestoreResponse {
                success: false,
                error: e.to_string(),
            })),
        }
    }

    async fn remove_order_book(
        &self,
        request: Request<RemoveRequest>,
    ) -> Result<Response<RemoveResponse>, Status> {
        let symbol = request.into_inner().symbol;
        info!(%symbol, "rpc remove order book");
        let success = self.engine.remove_order_book(&symbol).await;
        Ok(Response::new(RemoveResponse { success }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        let metrics = self.engine.metrics();
        Ok(Response::new(HealthResponse {
            healthy: true,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            symbol_count: self.engine.symbol_count().await as u64,
            orders_processed: self.engine.orders_processed(),
            trades_executed: EngineMetrics::read(&metrics.trades_executed),
        }))
    }
}
