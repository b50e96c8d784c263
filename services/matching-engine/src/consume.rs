//! Inbound order-intent consumer
//!
//! Reads JSON intents from the `orders` topic and dispatches them into the
//! engine. Parse failures are logged and counted, never fatal: the consumer
//! must outlive any malformed record.

use crate::engine::EngineCore;
use crate::metrics::EngineMetrics;
use crate::order::{IntentAction, OrderIntent};
use serde_json::json;
use services_common::constants::topics;
use services_common::stream::SharedBus;
use services_common::time::now_ms;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Consumer loop handle
pub struct IntentConsumer {
    engine: Arc<EngineCore>,
    bus: SharedBus,
}

impl IntentConsumer {
    /// Wire the consumer to the engine and the bus
    pub fn new(engine: Arc<EngineCore>, bus: SharedBus) -> Self {
        Self { engine, bus }
    }

    /// Run until the subscription closes or `shutdown` resolves
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut records = self.bus.subscribe(topics::ORDERS);
        info!("intent consumer started");
        loop {
            tokio::select! {
                record = records.recv() => match record {
                    Ok(record) => self.process(&record.payload).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "intent consumer lagged, records skipped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("intent consumer stopped");
    }

    /// Handle one raw stream record
    pub async fn process(&self, payload: &str) {
        let metrics = self.engine.metrics();
        EngineMetrics::incr(&metrics.orders_received);

        let intent: OrderIntent = match serde_json::from_str(payload) {
            Ok(intent) => intent,
            Err(e) => {
                EngineMetrics::incr(&metrics.orders_rejected);
                error!(error = %e, "dropping malformed order intent");
                return;
            }
        };

        match intent.action {
            IntentAction::Add => {
                let order = intent.into_order();
                if let Err(e) = self.engine.add_order(order).await {
                    EngineMetrics::incr(&metrics.orders_rejected);
                    warn!(error = %e, "add order refused");
                }
            }
            IntentAction::Cancel => {
                let found = self
                    .engine
                    .cancel_order(&intent.symbol, &intent.order_id)
                    .await;
                if !found {
                    // The book never saw this order, so no listener fires;
                    // the status record comes from here.
                    self.publish_not_found(&intent, "CANCEL_REJECTED");
                }
            }
            IntentAction::Replace => {
                let found = self
                    .engine
                    .replace_order(
                        &intent.symbol,
                        &intent.order_id,
                        intent.qty_delta,
                        intent.new_price,
                    )
                    .await;
                if !found {
                    self.publish_not_found(&intent, "REPLACE_REJECTED");
                }
            }
        }
    }

    fn publish_not_found(&self, intent: &OrderIntent, status: &str) {
        let record = json!({
            "event": "ORDER_STATUS",
            "symbol": intent.symbol,
            "order_id": intent.order_id,
            "user_id": intent.user_id,
            "status": status,
            "reason": "order not found",
            "timestamp": now_ms(),
        });
        self.bus
            .publish(topics::ORDER_STATUS, &intent.symbol, record.to_string());
    }
}
