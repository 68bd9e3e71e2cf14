// ============================================================================
// Transaction Domain Model
// ============================================================================

use crate::numeric::{NumericError, NumericResult, Price, Quantity};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use super::{AccountId, OrderId, ProductId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short upper-case reference handed to collaborators (invoices, notices).
    pub(crate) fn external_reference(&self) -> String {
        self.0.simple().to_string()[..8].to_uppercase()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One side of one execution. Every match produces two of these, one per
/// order, sharing price, quantity and timestamp.
///
/// Immutable once built: fields are public for reading but the ledger only
/// ever appends.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transaction {
    pub id: TransactionId,

    /// Unique short identifier, see [`TransactionId::external_reference`]
    pub external_id: String,

    /// Ledger position, assigned when the execution is prepared
    pub sequence: u64,

    pub product_id: ProductId,

    /// The order this record belongs to
    pub order_id: OrderId,

    /// The other side of the execution; `None` for synthetic records
    pub counter_order_id: Option<OrderId>,

    pub executed_price: Price,
    pub quantity: Quantity,
    pub fee: Price,
    pub executed_at: DateTime<Utc>,

    /// Approver of `order_id`, when the order went through approval
    pub executed_by: Option<AccountId>,
}

impl Transaction {
    /// Executed notional (price × quantity), which may exceed the `Price` range
    pub fn notional_value(&self) -> NumericResult<rust_decimal::Decimal> {
        self.executed_price
            .to_decimal()
            .checked_mul(self.quantity.to_decimal())
            .ok_or(NumericError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_reference_shape() {
        let id = TransactionId::new();
        let reference = id.external_reference();
        assert_eq!(reference.len(), 8);
        assert!(reference
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_notional_value_with_fractional() {
        let tx = Transaction {
            id: TransactionId::new(),
            external_id: "ABCDEF01".to_string(),
            sequence: 0,
            product_id: ProductId::from("WIDGET"),
            order_id: OrderId::new(),
            counter_order_id: None,
            executed_price: Price::from_parts(100, 500_000_000).unwrap(),
            quantity: Quantity::from_integer(2).unwrap(),
            fee: Price::ZERO,
            executed_at: Utc::now(),
            executed_by: None,
        };

        assert_eq!(tx.notional_value().unwrap(), rust_decimal::Decimal::from(201));
    }
}
