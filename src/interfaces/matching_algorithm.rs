// ============================================================================
// Matching Algorithm Interface
// Contract between the engine and the order-selection strategy
// ============================================================================

use crate::domain::{AccountId, Order, OrderId, Side};
use crate::numeric::{NumericResult, Price, Quantity};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One planned execution between the incoming order and a resting order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MatchResult {
    pub incoming_order_id: OrderId,
    pub resting_order_id: OrderId,
    pub resting_account_id: AccountId,
    /// Execution price (the resting order's limit)
    pub price: Price,
    pub quantity: Quantity,
}

/// Most cycles touch a handful of resting orders.
pub type MatchResults = SmallVec<[MatchResult; 4]>;

/// Strategy interface for matching algorithms.
///
/// Implementations are pure: they read the incoming order and a candidate
/// snapshot and return a plan. Applying the plan (fills, transactions, book
/// and price updates) is the engine's job, inside one atomic commit.
pub trait MatchingAlgorithm: Send + Sync {
    /// Plan the executions of `incoming` against `candidates`.
    ///
    /// `candidates` may contain ineligible orders; implementations filter them.
    fn match_order(&self, incoming: &Order, candidates: &[Order]) -> NumericResult<MatchResults>;

    /// Get the algorithm name for logging
    fn name(&self) -> &str;

    /// Whether a resting order at `resting_price` is marketable for `incoming`
    fn prices_cross(&self, incoming: &Order, resting_price: Price) -> bool {
        match incoming.side {
            Side::Buy => resting_price <= incoming.price,
            Side::Sell => resting_price >= incoming.price,
        }
    }
}
