//! Engine-level tests: registry, snapshot/restore, restart recovery and the
//! inbound intent path

use crate::utils::{engine_fixture, order};
use matching_engine::consume::IntentConsumer;
use matching_engine::metrics::EngineMetrics;
use matching_engine::snapshot::BookSnapshot;
use services_common::constants::{keys, topics};
use services_common::kv::Kv;
use services_common::Side;
use std::sync::Arc;

#[tokio::test]
async fn test_duplicate_order_id_refused() {
    let fx = engine_fixture();
    fx.engine
        .add_order(order("o1", "u1", Side::Buy, 99, 5, 1))
        .await
        .unwrap();
    let err = fx
        .engine
        .add_order(order("o1", "u1", Side::Buy, 98, 5, 2))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duplicate order id"));
    assert_eq!(fx.engine.order_count("XYZ").await, 1);
}

#[tokio::test]
async fn test_cancel_unknown_fails_silently() {
    let fx = engine_fixture();
    assert!(!fx.engine.cancel_order("XYZ", "missing").await);
    assert!(!fx.engine.replace_order("XYZ", "missing", 1, 0).await);
}

#[tokio::test]
async fn test_cancel_removes_from_index() {
    let fx = engine_fixture();
    fx.engine
        .add_order(order("o1", "u1", Side::Buy, 99, 5, 1))
        .await
        .unwrap();
    assert_eq!(fx.engine.order_count("XYZ").await, 1);

    assert!(fx.engine.cancel_order("XYZ", "o1").await);
    assert_eq!(fx.engine.order_count("XYZ").await, 0);
    assert!(fx.engine.depth_of("XYZ").await.bids.is_empty());
}

#[tokio::test]
async fn test_filled_orders_leave_the_index() {
    let fx = engine_fixture();
    fx.engine
        .add_order(order("a1", "maker", Side::Sell, 100, 5, 1))
        .await
        .unwrap();
    fx.engine
        .add_order(order("b1", "taker", Side::Buy, 100, 5, 2))
        .await
        .unwrap();

    // Both sides fully filled: nothing rests, nothing stays indexed
    assert_eq!(fx.engine.order_count("XYZ").await, 0);
    assert_eq!(fx.engine.total_order_count().await, 0);
    assert_eq!(fx.engine.orders_processed(), 2);
}

#[tokio::test]
async fn test_snapshot_restore_round_trip() {
    // Three resting bids and two asks at mixed prices
    let fx = engine_fixture();
    for (id, side, price, qty, ts) in [
        ("b1", Side::Buy, 98, 10, 1),
        ("b2", Side::Buy, 99, 5, 2),
        ("b3", Side::Buy, 97, 7, 3),
        ("a1", Side::Sell, 101, 4, 4),
        ("a2", Side::Sell, 103, 6, 5),
    ] {
        fx.engine
            .add_order(order(id, "u1", side, price, qty, ts))
            .await
            .unwrap();
    }

    let depth_before = fx.engine.depth_of("XYZ").await;
    let data = fx.engine.snapshot_order_book("XYZ").await;
    assert!(!data.is_empty());

    fx.engine.remove_order_book("XYZ").await;
    assert_eq!(fx.engine.symbol_count().await, 0);

    fx.engine.restore_order_book("XYZ", &data).await.unwrap();

    // Observational identity: same depth ladder, same resting order ids
    assert_eq!(fx.engine.depth_of("XYZ").await, depth_before);
    assert_eq!(fx.engine.order_count("XYZ").await, 5);
    for id in ["b1", "b2", "b3", "a1", "a2"] {
        assert!(fx.engine.cancel_order("XYZ", id).await, "missing {id}");
    }
}

#[tokio::test]
async fn test_snapshot_preserves_open_quantities() {
    let fx = engine_fixture();
    fx.engine
        .add_order(order("a1", "maker", Side::Sell, 100, 10, 1))
        .await
        .unwrap();
    // Partial fill leaves 6 open
    fx.engine
        .add_order(order("b1", "taker", Side::Buy, 100, 4, 2))
        .await
        .unwrap();

    let data = fx.engine.snapshot_order_book("XYZ").await;
    let snapshot = BookSnapshot::decode(&data).unwrap();
    assert_eq!(snapshot.orders.len(), 1);
    assert_eq!(snapshot.orders[0].order_id, "a1");
    assert_eq!(snapshot.orders[0].filled_qty, 4);
    assert_eq!(snapshot.orders[0].open_qty(), 6);

    fx.engine.remove_order_book("XYZ").await;
    fx.engine.restore_order_book("XYZ", &data).await.unwrap();
    let depth = fx.engine.depth_of("XYZ").await;
    assert_eq!(depth.asks[0].aggregate_qty, 6);
}

#[tokio::test]
async fn test_empty_book_snapshots_to_empty_string() {
    let fx = engine_fixture();
    assert!(fx.engine.snapshot_order_book("XYZ").await.is_empty());

    // A book whose only order has been cancelled is empty again
    fx.engine
        .add_order(order("o1", "u1", Side::Buy, 99, 5, 1))
        .await
        .unwrap();
    fx.engine.cancel_order("XYZ", "o1").await;
    assert!(fx.engine.snapshot_order_book("XYZ").await.is_empty());
}

#[tokio::test]
async fn test_restore_rejects_bad_payloads() {
    let fx = engine_fixture();
    assert!(fx.engine.restore_order_book("XYZ", "not json").await.is_err());
    assert!(fx
        .engine
        .restore_order_book("XYZ", r#"{"v":7,"symbol":"XYZ","timestamp":0,"orders":[]}"#)
        .await
        .is_err());
}

#[tokio::test]
async fn test_restart_recovery_from_cache() {
    let fx = engine_fixture();
    fx.engine
        .add_order(order("b1", "u1", Side::Buy, 99, 5, 1))
        .await
        .unwrap();
    fx.engine
        .add_order(order("a1", "u2", Side::Sell, 101, 3, 2))
        .await
        .unwrap();

    // Background pass persists snapshot plus freshness stamp
    let saved = fx.engine.snapshot_all_to_kv(fx.kv.as_ref()).await;
    assert_eq!(saved, 1);
    assert!(fx.kv.get("snapshot:XYZ").await.unwrap().is_some());
    assert!(fx
        .kv
        .get("snapshot:XYZ:timestamp")
        .await
        .unwrap()
        .is_some());

    // A fresh engine over the same cache picks the book back up
    let fx2 = engine_fixture();
    // (share the cache contents)
    let data = fx.kv.get("snapshot:XYZ").await.unwrap().unwrap();
    fx2.kv.set("snapshot:XYZ", &data).await.unwrap();
    fx2.kv
        .set(
            &format!("snapshot:XYZ{}", keys::SNAPSHOT_TS_SUFFIX),
            "123",
        )
        .await
        .unwrap();

    let restored = fx2.engine.restore_all_from_kv(fx2.kv.as_ref()).await;
    assert_eq!(restored, 1);
    assert_eq!(fx2.engine.order_count("XYZ").await, 2);
    assert_eq!(fx2.engine.depth_of("XYZ").await, fx.engine.depth_of("XYZ").await);
}

#[tokio::test]
async fn test_consumer_drops_malformed_records() {
    let fx = engine_fixture();
    let consumer = IntentConsumer::new(Arc::clone(&fx.engine), Arc::clone(&fx.bus));

    consumer.process("{not json").await;
    consumer
        .process(
            r#"{"action":"ADD","order_id":"o1","user_id":"u1","symbol":"XYZ",
                "side":"BUY","price":100,"quantity":5,"timestamp":1}"#,
        )
        .await;

    // The bad record is counted and dropped; the good one lands in the book
    let metrics = fx.engine.metrics();
    assert_eq!(EngineMetrics::read(&metrics.orders_received), 2);
    assert_eq!(EngineMetrics::read(&metrics.orders_rejected), 1);
    assert_eq!(fx.engine.order_count("XYZ").await, 1);
}

#[tokio::test]
async fn test_consumer_reports_unknown_cancel() {
    let fx = engine_fixture();
    let consumer = IntentConsumer::new(Arc::clone(&fx.engine), Arc::clone(&fx.bus));
    let mut statuses = fx.bus.subscribe(topics::ORDER_STATUS);

    consumer
        .process(r#"{"action":"CANCEL","order_id":"zz","user_id":"u1","symbol":"XYZ"}"#)
        .await;

    let record = statuses.try_recv().expect("status record missing");
    let value: serde_json::Value = serde_json::from_str(&record.payload).unwrap();
    assert_eq!(value["status"], "CANCEL_REJECTED");
    assert_eq!(value["reason"], "order not found");
    assert_eq!(value["order_id"], "zz");
}

#[tokio::test]
async fn test_consumer_replace_path() {
    let fx = engine_fixture();
    let consumer = IntentConsumer::new(Arc::clone(&fx.engine), Arc::clone(&fx.bus));

    consumer
        .process(
            r#"{"action":"ADD","order_id":"o1","user_id":"u1","symbol":"XYZ",
                "side":"SELL","price":100,"quantity":5,"timestamp":1}"#,
        )
        .await;
    consumer
        .process(
            r#"{"action":"REPLACE","order_id":"o1","user_id":"u1","symbol":"XYZ",
                "qty_delta":3,"new_price":101}"#,
        )
        .await;

    let depth = fx.engine.depth_of("XYZ").await;
    assert_eq!(depth.asks[0].price, 101);
    assert_eq!(depth.asks[0].aggregate_qty, 8);
}
