//! Price-time priority limit-order matching engine
//!
//! One book per symbol, a serialized command path through [`engine::EngineCore`],
//! and listener-driven market-data fan-out: every book operation yields a batch
//! of [`events::BookEvent`]s which [`market_data::MarketDataHandler`] turns into
//! stream records, cache writes, durable trades and user notifications.

pub mod book;
pub mod consume;
pub mod day;
pub mod depth;
pub mod engine;
pub mod events;
pub mod market_data;
pub mod metrics;
pub mod notifier;
pub mod order;
pub mod rpc;
pub mod snapshot;

pub use book::{OrderBook, SelfTradePolicy};
pub use engine::EngineCore;
pub use events::BookEvent;
pub use market_data::MarketDataHandler;
pub use order::{Order, OrderHandle, OrderIntent, OrderStatus};
