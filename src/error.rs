// ============================================================================
// Engine Errors
// Error taxonomy for submission, lifecycle transitions and match cycles
// ============================================================================

use crate::domain::{OrderId, OrderStatus, ProductId};
use crate::numeric::NumericError;
use thiserror::Error;

/// Top-level error returned by every fallible engine operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Input rejected before any state was touched.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested lifecycle action is not legal from the order's status.
    #[error("cannot {action} order {order_id} in status {from}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        action: &'static str,
    },

    /// An order changed between the read and the commit of a cycle.
    /// Transient: the caller may retry the whole operation.
    #[error("concurrent update on order {order_id} (expected version {expected}, found {found})")]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: u64,
        found: u64,
    },

    /// A fill larger than the order's remaining quantity.
    #[error("fill of {requested} exceeds remaining {remaining} on order {order_id}")]
    Overfill {
        order_id: OrderId,
        requested: String,
        remaining: String,
    },

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// The order was stored but its match cycle was rolled back.
    /// `retry_match` reruns the cycle.
    #[error("match cycle for order {order_id} failed: {source}")]
    MatchCycleFailed {
        order_id: OrderId,
        #[source]
        source: Box<EngineError>,
    },

    #[error("numeric error: {0}")]
    Numeric(#[from] NumericError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether retrying the same call may succeed without any input change.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::ConcurrencyConflict { .. } => true,
            EngineError::MatchCycleFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Reasons an order submission or lifecycle request is refused up front.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(String),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(String),

    #[error("price {price} is not a multiple of tick size {tick}")]
    OffTick { price: String, tick: String },

    #[error("quantity {quantity} is not a multiple of lot size {lot}")]
    OffLot { quantity: String, lot: String },

    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),

    #[error("product {0} is not available for trading")]
    ProductNotTradeable(ProductId),

    #[error("expiration date must be in the future")]
    ExpiryInPast,

    #[error("a rejection reason is required")]
    MissingRejectionReason,
}

/// The journal refused a commit batch; nothing from the batch was applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct PersistenceError {
    pub reason: String,
}

impl PersistenceError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = EngineError::from(ValidationError::ProductNotTradeable(ProductId::from(
            "WIDGET",
        )));
        assert_eq!(
            err.to_string(),
            "validation failed: product WIDGET is not available for trading"
        );
    }

    #[test]
    fn test_transient_classification() {
        let order_id = OrderId::new();
        let conflict = EngineError::ConcurrencyConflict {
            order_id,
            expected: 1,
            found: 2,
        };
        assert!(conflict.is_transient());

        let wrapped = EngineError::MatchCycleFailed {
            order_id,
            source: Box::new(conflict),
        };
        assert!(wrapped.is_transient());

        let fatal = EngineError::from(PersistenceError::new("disk full"));
        assert!(!fatal.is_transient());
    }
}
