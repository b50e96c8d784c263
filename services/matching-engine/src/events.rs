//! Book events emitted to the market-data handler
//!
//! Every book operation pushes its events onto a pending queue which the
//! engine drains after the operation and hands to the handler in order. For
//! one execution the order is: taker fill, maker fill, trade; depth changes
//! follow all fills of the operation.

use crate::depth::Depth;
use crate::order::OrderHandle;
use services_common::{Price, Quantity};

/// One listener event from a book
#[derive(Clone)]
pub enum BookEvent {
    /// Order admitted for matching
    Accepted { order: OrderHandle },
    /// Order refused by policy; never entered the book
    Rejected { order: OrderHandle, reason: String },
    /// One side of one execution. Fires twice per execution: first with the
    /// aggressing order (`is_taker`), then with the resting one.
    Filled {
        order: OrderHandle,
        matched: OrderHandle,
        qty: Quantity,
        price: Price,
        is_taker: bool,
    },
    /// One execution, book-level view
    Traded { qty: Quantity, price: Price },
    /// Order removed before completion
    Cancelled { order: OrderHandle, reason: String },
    /// Cancel refused (unknown or already terminal)
    CancelRejected { order: OrderHandle, reason: String },
    /// Quantity and/or price adjusted
    Replaced {
        order: OrderHandle,
        qty_delta: i64,
        new_price: Price,
    },
    /// Replace refused
    ReplaceRejected { order: OrderHandle, reason: String },
    /// Top-N ladder changed below the top of book
    DepthChanged { depth: Depth },
    /// Top of book changed (implies a depth change; emitted instead of
    /// `DepthChanged` for the same operation)
    BboChanged { depth: Depth },
}

impl std::fmt::Debug for BookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookEvent::Accepted { order } => {
                write!(f, "Accepted({})", order.lock().order_id)
            }
            BookEvent::Rejected { order, reason } => {
                write!(f, "Rejected({}, {reason})", order.lock().order_id)
            }
            BookEvent::Filled {
                order,
                qty,
                price,
                is_taker,
                ..
            } => write!(
                f,
                "Filled({}, qty={qty}, price={price}, taker={is_taker})",
                order.lock().order_id
            ),
            BookEvent::Traded { qty, price } => write!(f, "Traded(qty={qty}, price={price})"),
            BookEvent::Cancelled { order, reason } => {
                write!(f, "Cancelled({}, {reason})", order.lock().order_id)
            }
            BookEvent::CancelRejected { order, reason } => {
                write!(f, "CancelRejected({}, {reason})", order.lock().order_id)
            }
            BookEvent::Replaced {
                order,
                qty_delta,
                new_price,
            } => write!(
                f,
                "Replaced({}, delta={qty_delta}, price={new_price})",
                order.lock().order_id
            ),
            BookEvent::ReplaceRejected { order, reason } => {
                write!(f, "ReplaceRejected({}, {reason})", order.lock().order_id)
            }
            BookEvent::DepthChanged { depth } => write!(
                f,
                "DepthChanged(bids={}, asks={})",
                depth.bids.len(),
                depth.asks.len()
            ),
            BookEvent::BboChanged { depth } => write!(
                f,
                "BboChanged(bids={}, asks={})",
                depth.bids.len(),
                depth.asks.len()
            ),
        }
    }
}
