// ============================================================================
// Order Matching Engine Library
// Continuous double-auction matching with an append-only ledger and derived
// order book and price history
// ============================================================================

//! # Order Matching Engine
//!
//! A continuous double-auction matching engine for tradeable products.
//!
//! ## Features
//!
//! - **Price/time priority** matching with partial fills, executed at the
//!   resting order's price
//! - **Order lifecycle** with approval holds, rejection, cancellation and an
//!   idempotent expiration sweep
//! - **Append-only transaction ledger**, two transactions per match
//! - **Derived data**: order-book depth snapshots after every book change and
//!   OHLCV price bars per product and period
//! - **Atomic match cycles**: one journaled commit per cycle, optimistic
//!   version checks, per-product serialization
//!
//! ## Example
//!
//! ```rust
//! use order_matching_engine::prelude::*;
//! use order_matching_engine::numeric::{Price, Quantity};
//! use std::sync::Arc;
//!
//! let engine = MatchingEngineBuilder::new()
//!     .build(Arc::new(NoOpEventHandler))
//!     .unwrap();
//! engine.register_product("WIDGET", "Widget");
//!
//! engine
//!     .submit_order(
//!         "seller",
//!         "WIDGET",
//!         Side::Sell,
//!         Quantity::from_integer(5).unwrap(),
//!         Price::from_integer(100).unwrap(),
//!         TimeInForce::GoodTillCancel,
//!     )
//!     .unwrap();
//!
//! let buy = engine
//!     .submit(OrderDraft::new(
//!         "buyer",
//!         "WIDGET",
//!         Side::Buy,
//!         Quantity::from_integer(10).unwrap(),
//!         Price::from_integer(105).unwrap(),
//!         TimeInForce::GoodTillCancel,
//!     ))
//!     .unwrap();
//!
//! // executed at the resting price
//! assert_eq!(buy.transactions[0].executed_price, Price::from_integer(100).unwrap());
//! assert_eq!(buy.order.status(), OrderStatus::PartiallyFilled);
//!
//! let book = engine.latest_snapshot(&ProductId::from("WIDGET")).unwrap();
//! println!("Best bid: {:?}", book.best_bid);
//! println!("Best ask: {:?}", book.best_ask);
//! ```

pub mod domain;
pub mod engine;
pub mod error;
pub mod interfaces;
pub mod numeric;
pub mod store;
pub mod utils;

// Re-exports for convenience
pub mod prelude {
    pub use crate::domain::{
        AccountId, ApprovalPolicy, BarInterval, EngineConfig, Order, OrderBookSnapshot,
        OrderDraft, OrderId, OrderStateTransition, OrderStatus, PriceBar, Product, ProductId,
        SelfTradePolicy, Side, TimeInForce, Transaction, TransactionId,
    };
    pub use crate::engine::{
        create_from_config, ExecutionReport, LifecycleReport, MatchingEngine,
        MatchingEngineBuilder, PriceTimePriority,
    };
    pub use crate::error::{EngineError, EngineResult, PersistenceError, ValidationError};
    pub use crate::interfaces::{
        ChannelEventHandler, Clock, CommitBatch, EngineEvent, EventHandler, InMemoryJournal,
        Journal, LoggingEventHandler, ManualClock, MatchingAlgorithm, NoOpEventHandler,
        NoOpJournal, SystemClock,
    };
}
