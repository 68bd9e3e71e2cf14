// ============================================================================
// Domain Models Module
// Orders, transactions, book snapshots, price bars and engine configuration
// ============================================================================

pub mod config;
pub mod order;
pub mod order_book;
pub mod price_history;
pub mod product;
pub mod transaction;

pub use config::{ApprovalPolicy, EngineConfig, SelfTradePolicy};
pub use order::{
    AccountId, Order, OrderDraft, OrderId, ProductId, Side, StatusChange, TimeInForce,
};
pub use order_book::OrderBookSnapshot;
pub use price_history::{BarInterval, PriceBar};
pub use product::{Product, ProductRegistry};
pub use transaction::{Transaction, TransactionId};

// Re-export state machine
pub use order::state::{OrderStateTransition, OrderStatus};
