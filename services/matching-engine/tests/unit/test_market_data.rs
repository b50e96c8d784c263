//! Fan-out tests: one execution driven end to end through the engine,
//! observed on the outbound topics, the cache, the trade store and the
//! notifier

use crate::utils::{engine_fixture, order, order_with, wait_for_deliveries};
use services_common::constants::topics;
use services_common::kv::Kv;
use services_common::stream::StreamRecord;
use services_common::{OrderConditions, Side};
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<StreamRecord>) -> Vec<serde_json::Value> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(serde_json::from_str(&record.payload).unwrap());
    }
    records
}

#[tokio::test]
async fn test_execution_fans_out_everywhere() {
    let fx = engine_fixture();
    let mut fills = fx.bus.subscribe(topics::FILLS);
    let mut trades = fx.bus.subscribe(topics::TRADES);
    let mut statuses = fx.bus.subscribe(topics::ORDER_STATUS);
    let mut depth = fx.bus.subscribe(topics::DEPTH);

    fx.engine
        .add_order(order("a1", "seller", Side::Sell, 100, 5, 1))
        .await
        .unwrap();
    fx.engine
        .add_order(order("b1", "buyer", Side::Buy, 100, 5, 2))
        .await
        .unwrap();

    // Two FILL records per execution, one per side, buyer/seller resolved
    let fill_records = drain(&mut fills);
    assert_eq!(fill_records.len(), 2);
    for record in &fill_records {
        assert_eq!(record["event"], "FILL");
        assert_eq!(record["symbol"], "XYZ");
        assert_eq!(record["buyer_id"], "buyer");
        assert_eq!(record["seller_id"], "seller");
        assert_eq!(record["fill_qty"], 5);
        assert_eq!(record["fill_price"], 100);
    }
    assert_eq!(fill_records[0]["order_id"], "b1"); // taker side first
    assert_eq!(fill_records[1]["order_id"], "a1");

    // One TRADE record per execution
    let trade_records = drain(&mut trades);
    assert_eq!(trade_records.len(), 1);
    assert_eq!(trade_records[0]["event"], "TRADE");
    assert_eq!(trade_records[0]["quantity"], 5);
    assert_eq!(trade_records[0]["price"], 100);

    // ACCEPTED for both orders
    let status_records = drain(&mut statuses);
    let accepted = status_records
        .iter()
        .filter(|r| r["status"] == "ACCEPTED")
        .count();
    assert_eq!(accepted, 2);

    // Depth record in the compact form, also cached
    let depth_records = drain(&mut depth);
    assert!(!depth_records.is_empty());
    let last = depth_records.last().unwrap();
    assert_eq!(last["e"], "d");
    assert_eq!(last["s"], "XYZ");
    let cached = fx.kv.get("depth:XYZ").await.unwrap().unwrap();
    let cached: serde_json::Value = serde_json::from_str(&cached).unwrap();
    assert_eq!(cached["e"], "d");

    // Durable trade row with both order ids
    let stored = fx.trade_store.trades();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].buyer_order, "b1");
    assert_eq!(stored[0].seller_order, "a1");
    assert_eq!(stored[0].price, 100);
    assert_eq!(stored[0].quantity, 5);

    // Day aggregate snapshots
    let ohlc = fx.kv.get("ohlc:XYZ").await.unwrap().unwrap();
    let ohlc: serde_json::Value = serde_json::from_str(&ohlc).unwrap();
    assert_eq!(ohlc["open"], 100);
    assert_eq!(ohlc["close"], 100);
    assert_eq!(ohlc["volume"], 5);
    let ticker = fx.kv.get("ticker:XYZ").await.unwrap().unwrap();
    let ticker: serde_json::Value = serde_json::from_str(&ticker).unwrap();
    assert_eq!(ticker["price"], 100);

    // Live candle hash was started for the current minute
    let candle = fx.kv.hgetall("candle:1m:XYZ").await.unwrap();
    assert_eq!(candle.get("o").map(String::as_str), Some("100"));
    assert_eq!(candle.get("v").map(String::as_str), Some("5"));

    // Both users notified: ACCEPTED twice plus FILLED twice
    wait_for_deliveries(&fx.sink, 4).await;
    let pushed = fx.sink.delivered();
    let users: Vec<&str> = pushed.iter().map(|m| m.user_id.as_str()).collect();
    assert!(users.contains(&"buyer"));
    assert!(users.contains(&"seller"));
}

#[tokio::test]
async fn test_volume_counted_once_per_execution() {
    // Two executions against one resting order; fills fire twice per
    // execution but the aggregate only advances on the taker side.
    let fx = engine_fixture();
    fx.engine
        .add_order(order("a1", "seller", Side::Sell, 100, 10, 1))
        .await
        .unwrap();
    fx.engine
        .add_order(order("b1", "buyer", Side::Buy, 100, 4, 2))
        .await
        .unwrap();
    fx.engine
        .add_order(order("b2", "buyer", Side::Buy, 100, 6, 3))
        .await
        .unwrap();

    let ohlc = fx.kv.get("ohlc:XYZ").await.unwrap().unwrap();
    let ohlc: serde_json::Value = serde_json::from_str(&ohlc).unwrap();
    assert_eq!(ohlc["volume"], 10);

    // Trade store holds one row per execution, not per side
    assert_eq!(fx.trade_store.trades().len(), 2);
}

#[tokio::test]
async fn test_rejected_order_status_reaches_user() {
    let fx = engine_fixture();
    let mut statuses = fx.bus.subscribe(topics::ORDER_STATUS);

    fx.engine
        .add_order(order("a1", "maker", Side::Sell, 100, 4, 1))
        .await
        .unwrap();
    fx.engine
        .add_order(order_with(
            "b1",
            "taker",
            Side::Buy,
            100,
            10,
            2,
            OrderConditions {
                all_or_none: true,
                immediate_or_cancel: false,
            },
        ))
        .await
        .unwrap();

    let records = drain(&mut statuses);
    let rejected = records
        .iter()
        .find(|r| r["status"] == "REJECTED")
        .expect("rejected status missing");
    assert_eq!(rejected["order_id"], "b1");
    assert_eq!(rejected["reason"], "AON unfillable");

    // ACCEPTED for both orders plus the REJECTED push
    wait_for_deliveries(&fx.sink, 3).await;
    let pushed = fx.sink.delivered();
    assert!(pushed.iter().any(|m| {
        m.user_id == "taker" && m.payload["data"]["status"] == "REJECTED"
    }));
}

#[tokio::test]
async fn test_cancel_status_without_reason() {
    let fx = engine_fixture();
    let mut statuses = fx.bus.subscribe(topics::ORDER_STATUS);

    fx.engine
        .add_order(order("o1", "u1", Side::Buy, 99, 5, 1))
        .await
        .unwrap();
    fx.engine.cancel_order("XYZ", "o1").await;

    let records = drain(&mut statuses);
    let cancelled = records
        .iter()
        .find(|r| r["status"] == "CANCELLED")
        .expect("cancelled status missing");
    // User-requested cancels carry no reason field
    assert!(cancelled.get("reason").is_none());
}

#[tokio::test]
async fn test_fill_notification_carries_final_status() {
    let fx = engine_fixture();
    fx.engine
        .add_order(order("a1", "seller", Side::Sell, 100, 5, 1))
        .await
        .unwrap();
    fx.engine
        .add_order(order("b1", "buyer", Side::Buy, 100, 5, 2))
        .await
        .unwrap();

    wait_for_deliveries(&fx.sink, 4).await;
    assert!(fx
        .sink
        .delivered()
        .iter()
        .any(|m| m.payload["data"]["status"] == "FILLED"));
}
