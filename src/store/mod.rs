// ============================================================================
// Store Module
// Order records and the append-only transaction ledger
// ============================================================================

mod ledger;
mod order_store;

pub use ledger::TransactionLedger;
pub use order_store::{OrderStore, StagedOrders, StoreView};
