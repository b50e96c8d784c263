//! Book-level matching scenarios: price-time priority, price improvement,
//! AON/IOC handling, replace semantics and depth invariants

use crate::utils::{handle, order_with};
use matching_engine::book::{OrderBook, SelfTradePolicy};
use matching_engine::events::BookEvent;
use matching_engine::order::OrderStatus;
use services_common::{OrderConditions, Price, Quantity, Side};

fn fills(events: &[BookEvent]) -> Vec<(String, Quantity, Price, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            BookEvent::Filled {
                order,
                qty,
                price,
                is_taker,
                ..
            } => Some((order.lock().order_id.clone(), *qty, *price, *is_taker)),
            _ => None,
        })
        .collect()
}

fn trades(events: &[BookEvent]) -> Vec<(Quantity, Price)> {
    events
        .iter()
        .filter_map(|e| match e {
            BookEvent::Traded { qty, price } => Some((*qty, *price)),
            _ => None,
        })
        .collect()
}

fn cancel_reason(events: &[BookEvent]) -> Option<String> {
    events.iter().find_map(|e| match e {
        BookEvent::Cancelled { reason, .. } => Some(reason.clone()),
        _ => None,
    })
}

#[test]
fn test_price_time_fifo_market_sweep() {
    // Seed asks (A1, 100, 5, t=1), (A2, 100, 5, t=2); market BUY qty=7.
    let mut book = OrderBook::new("XYZ");
    let a1 = handle("A1", "maker1", Side::Sell, 100, 5, 1);
    let a2 = handle("A2", "maker2", Side::Sell, 100, 5, 2);
    book.add(a1.clone());
    book.add(a2.clone());
    book.take_events();

    let taker = handle("B1", "taker", Side::Buy, 0, 7, 3);
    book.add(taker.clone());
    let events = book.take_events();

    // A1 fully filled first, then A2 partially: strict FIFO at one level
    assert_eq!(a1.lock().filled_qty, 5);
    assert_eq!(a1.lock().status, OrderStatus::Filled);
    assert_eq!(a2.lock().filled_qty, 2);
    assert_eq!(a2.lock().open_qty(), 3);
    assert_eq!(taker.lock().filled_qty, 7);

    assert_eq!(trades(&events), vec![(5, 100), (2, 100)]);

    // Fill events fire taker-first per execution
    let fill_log = fills(&events);
    assert_eq!(fill_log.len(), 4);
    assert_eq!(fill_log[0], ("B1".to_string(), 5, 100, true));
    assert_eq!(fill_log[1], ("A1".to_string(), 5, 100, false));
    assert_eq!(fill_log[2], ("B1".to_string(), 2, 100, true));
    assert_eq!(fill_log[3], ("A2".to_string(), 2, 100, false));

    // Book after: A2 rests with open 3
    let depth = book.depth();
    assert!(depth.bids.is_empty());
    assert_eq!(depth.asks.len(), 1);
    assert_eq!(depth.asks[0].price, 100);
    assert_eq!(depth.asks[0].aggregate_qty, 3);
    assert_eq!(depth.asks[0].order_count, 1);
}

#[test]
fn test_price_improvement_goes_to_taker() {
    // Ask at 98; BUY limit 100 executes at 98, not 100.
    let mut book = OrderBook::new("XYZ");
    book.add(handle("A1", "maker", Side::Sell, 98, 10, 1));
    book.take_events();

    let taker = handle("B1", "taker", Side::Buy, 100, 10, 2);
    book.add(taker.clone());
    let events = book.take_events();

    assert_eq!(trades(&events), vec![(10, 98)]);
    assert_eq!(taker.lock().filled_cost, 980);
    assert_eq!(book.resting_count(), 0);
}

#[test]
fn test_aon_unfillable_rejects_and_leaves_book_unchanged() {
    // Ask 4 @ 100; AON BUY for 10 cannot complete in one pass.
    let mut book = OrderBook::new("XYZ");
    let a1 = handle("A1", "maker", Side::Sell, 100, 4, 1);
    book.add(a1.clone());
    book.take_events();

    let taker = order_with(
        "B1",
        "taker",
        Side::Buy,
        100,
        10,
        2,
        OrderConditions {
            all_or_none: true,
            immediate_or_cancel: false,
        },
    )
    .into_handle();
    book.add(taker.clone());
    let events = book.take_events();

    assert!(events
        .iter()
        .any(|e| matches!(e, BookEvent::Rejected { reason, .. } if reason == "AON unfillable")));
    assert!(fills(&events).is_empty());
    assert_eq!(taker.lock().status, OrderStatus::Rejected);
    assert_eq!(taker.lock().filled_qty, 0);

    // Book unchanged
    assert_eq!(a1.lock().open_qty(), 4);
    assert_eq!(book.best_ask(), Some(100));
    assert_eq!(book.resting_count(), 1);
}

#[test]
fn test_aon_fillable_executes_completely() {
    let mut book = OrderBook::new("XYZ");
    book.add(handle("A1", "m1", Side::Sell, 99, 6, 1));
    book.add(handle("A2", "m2", Side::Sell, 100, 6, 2));
    book.take_events();

    let taker = order_with(
        "B1",
        "taker",
        Side::Buy,
        100,
        10,
        3,
        OrderConditions {
            all_or_none: true,
            immediate_or_cancel: false,
        },
    )
    .into_handle();
    book.add(taker.clone());
    let events = book.take_events();

    assert_eq!(taker.lock().filled_qty, 10);
    assert_eq!(trades(&events), vec![(6, 99), (4, 100)]);
}

#[test]
fn test_aon_rejects_when_self_maker_blocks_the_queue() {
    // Under CancelTaker, matching halts at the first same-user maker, so an
    // AON order must not count liquidity queued behind it: 4 reachable of 10
    // needed means reject up front, never a partial fill.
    let mut book = OrderBook::with_policy("XYZ", SelfTradePolicy::CancelTaker);
    let a1 = handle("A1", "other", Side::Sell, 100, 4, 1);
    let a2 = handle("A2", "self", Side::Sell, 100, 6, 2);
    book.add(a1.clone());
    book.add(a2.clone());
    book.take_events();

    let taker = order_with(
        "B1",
        "self",
        Side::Buy,
        100,
        10,
        3,
        OrderConditions {
            all_or_none: true,
            immediate_or_cancel: false,
        },
    )
    .into_handle();
    book.add(taker.clone());
    let events = book.take_events();

    assert!(events
        .iter()
        .any(|e| matches!(e, BookEvent::Rejected { reason, .. } if reason == "AON unfillable")));
    assert!(fills(&events).is_empty());
    assert_eq!(taker.lock().filled_qty, 0);
    assert_eq!(taker.lock().status, OrderStatus::Rejected);

    // Book unchanged on both sides
    assert_eq!(a1.lock().open_qty(), 4);
    assert_eq!(a2.lock().open_qty(), 6);
    assert_eq!(book.resting_count(), 2);
}

#[test]
fn test_aon_fills_from_liquidity_ahead_of_self_maker() {
    // Enough non-self liquidity in front of the self maker: the AON order
    // completes before matching would reach it.
    let mut book = OrderBook::with_policy("XYZ", SelfTradePolicy::CancelTaker);
    book.add(handle("A1", "other", Side::Sell, 99, 10, 1));
    let a2 = handle("A2", "self", Side::Sell, 100, 5, 2);
    book.add(a2.clone());
    book.take_events();

    let taker = order_with(
        "B1",
        "self",
        Side::Buy,
        100,
        10,
        3,
        OrderConditions {
            all_or_none: true,
            immediate_or_cancel: false,
        },
    )
    .into_handle();
    book.add(taker.clone());
    let events = book.take_events();

    assert_eq!(taker.lock().filled_qty, 10);
    assert_eq!(taker.lock().status, OrderStatus::Filled);
    assert_eq!(trades(&events), vec![(10, 99)]);
    assert_eq!(a2.lock().open_qty(), 5);
}

#[test]
fn test_ioc_residual_cancels() {
    // Ask 4 @ 100; IOC BUY for 10 fills 4 then cancels the remaining 6.
    let mut book = OrderBook::new("XYZ");
    book.add(handle("A1", "maker", Side::Sell, 100, 4, 1));
    book.take_events();

    let taker = order_with(
        "B1",
        "taker",
        Side::Buy,
        100,
        10,
        2,
        OrderConditions {
            all_or_none: false,
            immediate_or_cancel: true,
        },
    )
    .into_handle();
    book.add(taker.clone());
    let events = book.take_events();

    assert_eq!(trades(&events), vec![(4, 100)]);
    assert_eq!(cancel_reason(&events).as_deref(), Some("IOC residual"));
    assert_eq!(taker.lock().filled_qty, 4);
    assert_eq!(taker.lock().status, OrderStatus::Cancelled);
    // Nothing rests on either side
    assert_eq!(book.resting_count(), 0);
}

#[test]
fn test_market_order_never_rests() {
    let mut book = OrderBook::new("XYZ");
    let taker = handle("B1", "taker", Side::Buy, 0, 5, 1);
    book.add(taker.clone());
    let events = book.take_events();

    assert_eq!(
        cancel_reason(&events).as_deref(),
        Some("market order residual")
    );
    assert_eq!(book.resting_count(), 0);
}

#[test]
fn test_conservation_of_quantity_and_cost() {
    let mut book = OrderBook::new("XYZ");
    let maker = handle("A1", "m", Side::Sell, 100, 8, 1);
    let taker = handle("B1", "t", Side::Buy, 100, 5, 2);
    book.add(maker.clone());
    book.add(taker.clone());
    book.take_events();

    // For one execution of size q: filled_qty increments sum to 2q and
    // filled_cost increments to 2*q*price across the two orders.
    assert_eq!(maker.lock().filled_qty + taker.lock().filled_qty, 10);
    assert_eq!(maker.lock().filled_cost + taker.lock().filled_cost, 1000);
}

#[test]
fn test_depth_aggregation_matches_resting_orders() {
    let mut book = OrderBook::new("XYZ");
    book.add(handle("B1", "u1", Side::Buy, 99, 10, 1));
    book.add(handle("B2", "u2", Side::Buy, 99, 4, 2));
    book.add(handle("B3", "u3", Side::Buy, 98, 7, 3));
    book.add(handle("A1", "u4", Side::Sell, 101, 3, 4));
    book.take_events();

    let depth = book.depth();
    // Per-level aggregate equals the sum of resting open quantities
    assert_eq!(depth.bids[0].price, 99);
    assert_eq!(depth.bids[0].aggregate_qty, 14);
    assert_eq!(depth.bids[0].order_count, 2);
    assert_eq!(depth.bids[1].price, 98);
    assert_eq!(depth.bids[1].aggregate_qty, 7);
    assert_eq!(depth.bids[1].order_count, 1);
    assert_eq!(depth.asks[0].aggregate_qty, 3);

    let total_open: u64 = book
        .resting_orders()
        .iter()
        .map(|h| h.lock().open_qty())
        .sum();
    let total_depth: u64 = depth
        .bids
        .iter()
        .chain(depth.asks.iter())
        .map(|l| l.aggregate_qty)
        .sum();
    assert_eq!(total_open, total_depth);
}

#[test]
fn test_no_crossed_book_invariant() {
    let mut book = OrderBook::new("XYZ");
    book.add(handle("B1", "u1", Side::Buy, 100, 5, 1));
    book.add(handle("A1", "u2", Side::Sell, 102, 5, 2));
    // Crossing order consumes the ask entirely and rests the remainder
    book.add(handle("B2", "u3", Side::Buy, 103, 8, 3));
    book.take_events();

    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        assert!(bid < ask, "book crossed: bid {bid} >= ask {ask}");
    }
    // The residual 3 rests at 103 as the new best bid
    assert_eq!(book.best_bid(), Some(103));
    assert!(book.best_ask().is_none());
}

#[test]
fn test_replace_price_change_loses_time_priority() {
    let mut book = OrderBook::new("XYZ");
    let a1 = handle("A1", "m1", Side::Sell, 100, 5, 1);
    let a2 = handle("A2", "m2", Side::Sell, 101, 5, 2);
    book.add(a1.clone());
    book.add(a2.clone());
    book.take_events();

    // Re-price A2 onto A1's level: it queues behind despite any timestamps
    book.replace(a2.clone(), 0, 100);
    let events = book.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, BookEvent::Replaced { new_price: 100, .. })));

    let taker = handle("B1", "t", Side::Buy, 100, 5, 3);
    book.add(taker);
    book.take_events();

    assert_eq!(a1.lock().filled_qty, 5);
    assert_eq!(a2.lock().filled_qty, 0);
    assert_eq!(book.best_ask(), Some(100));
}

#[test]
fn test_replace_qty_only_keeps_priority() {
    let mut book = OrderBook::new("XYZ");
    let a1 = handle("A1", "m1", Side::Sell, 100, 5, 1);
    let a2 = handle("A2", "m2", Side::Sell, 100, 5, 2);
    book.add(a1.clone());
    book.add(a2.clone());
    book.take_events();

    // Shrinking A1 does not forfeit its place at the front
    book.replace(a1.clone(), -2, 0);
    book.take_events();
    assert_eq!(a1.lock().quantity, 3);

    let taker = handle("B1", "t", Side::Buy, 100, 3, 3);
    book.add(taker);
    book.take_events();
    assert_eq!(a1.lock().filled_qty, 3);
    assert_eq!(a2.lock().filled_qty, 0);
}

#[test]
fn test_replace_below_filled_rejected() {
    let mut book = OrderBook::new("XYZ");
    let a1 = handle("A1", "m", Side::Sell, 100, 10, 1);
    book.add(a1.clone());
    book.take_events();
    book.add(handle("B1", "t", Side::Buy, 100, 6, 2));
    book.take_events();
    assert_eq!(a1.lock().filled_qty, 6);

    // 10 - 5 = 5 <= 6 filled: refused
    book.replace(a1.clone(), -5, 0);
    let events = book.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, BookEvent::ReplaceRejected { reason, .. } if reason == "quantity below filled")));
    assert_eq!(a1.lock().quantity, 10);
}

#[test]
fn test_replace_repriced_order_rematches() {
    let mut book = OrderBook::new("XYZ");
    let b1 = handle("B1", "m", Side::Buy, 95, 5, 1);
    let a1 = handle("A1", "m2", Side::Sell, 100, 5, 2);
    book.add(b1.clone());
    book.add(a1.clone());
    book.take_events();

    // Re-pricing the bid through the ask executes immediately
    book.replace(b1.clone(), 0, 100);
    let events = book.take_events();
    assert_eq!(trades(&events), vec![(5, 100)]);
    assert_eq!(b1.lock().status, OrderStatus::Filled);
    assert_eq!(book.resting_count(), 0);
}

#[test]
fn test_cancel_resting_and_reject_unknown() {
    let mut book = OrderBook::new("XYZ");
    let b1 = handle("B1", "u", Side::Buy, 99, 5, 1);
    book.add(b1.clone());
    book.take_events();

    book.cancel(b1.clone());
    let events = book.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, BookEvent::Cancelled { .. })));
    assert_eq!(b1.lock().status, OrderStatus::Cancelled);
    assert_eq!(book.resting_count(), 0);

    // Second cancel: no longer resting
    book.cancel(b1.clone());
    let events = book.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, BookEvent::CancelRejected { reason, .. } if reason == "order not resting")));
}

#[test]
fn test_depth_events_fire_after_fills() {
    let mut book = OrderBook::new("XYZ");
    book.add(handle("A1", "m", Side::Sell, 100, 5, 1));
    book.take_events();
    book.add(handle("B1", "t", Side::Buy, 100, 5, 2));
    let events = book.take_events();

    let last_fill = events
        .iter()
        .rposition(|e| matches!(e, BookEvent::Filled { .. }))
        .unwrap();
    let depth_pos = events
        .iter()
        .position(|e| matches!(e, BookEvent::DepthChanged { .. } | BookEvent::BboChanged { .. }))
        .unwrap();
    assert!(depth_pos > last_fill);
}
