// ============================================================================
// Order Domain Model
// ============================================================================

use crate::error::{EngineError, EngineResult};
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use state::{OrderStateTransition, OrderStatus};

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares a string-backed identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Owner of an order (trader, or approver for lifecycle actions)
    AccountId
);
string_id!(
    /// Tradeable product reference
    ProductId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeInForce {
    /// Expires at the trading-day cut-off
    Day,
    /// Remains open until filled or cancelled
    GoodTillCancel,
    /// Expires at the given instant
    GoodTillDate(DateTime<Utc>),
}

// ============================================================================
// Order State Machine
// ============================================================================

pub mod state {
    use std::fmt;

    #[cfg(feature = "serde")]
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    #[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
    pub enum OrderStatus {
        Pending,
        Active,
        PartiallyFilled,
        Filled,
        Cancelled,
        Rejected,
        Expired,
    }

    impl OrderStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                OrderStatus::Filled
                    | OrderStatus::Cancelled
                    | OrderStatus::Rejected
                    | OrderStatus::Expired
            )
        }

        /// Eligible to rest in the book and be matched against.
        pub fn is_resting(&self) -> bool {
            matches!(self, OrderStatus::Active | OrderStatus::PartiallyFilled)
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                OrderStatus::Pending => "pending",
                OrderStatus::Active => "active",
                OrderStatus::PartiallyFilled => "partially_filled",
                OrderStatus::Filled => "filled",
                OrderStatus::Cancelled => "cancelled",
                OrderStatus::Rejected => "rejected",
                OrderStatus::Expired => "expired",
            }
        }
    }

    impl fmt::Display for OrderStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Valid state transitions for the order state machine
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OrderStateTransition {
        Approve,
        Reject,
        PartialFill,
        Fill,
        Cancel,
        Expire,
    }

    impl OrderStateTransition {
        pub fn verb(&self) -> &'static str {
            match self {
                OrderStateTransition::Approve => "approve",
                OrderStateTransition::Reject => "reject",
                OrderStateTransition::PartialFill | OrderStateTransition::Fill => "fill",
                OrderStateTransition::Cancel => "cancel",
                OrderStateTransition::Expire => "expire",
            }
        }
    }

    impl OrderStatus {
        /// Next status for `transition`, or `None` when the move is illegal.
        ///
        /// Nothing leads back to `Pending`, and `Active` is reachable only
        /// from `Pending`, so every path is monotonic.
        pub fn transition(&self, transition: OrderStateTransition) -> Option<OrderStatus> {
            use OrderStateTransition as T;
            use OrderStatus as S;

            match (self, transition) {
                (S::Pending, T::Approve) => Some(S::Active),
                (S::Pending, T::Reject) => Some(S::Rejected),

                (S::Active | S::PartiallyFilled, T::PartialFill) => Some(S::PartiallyFilled),
                (S::Active | S::PartiallyFilled, T::Fill) => Some(S::Filled),

                (S::Pending | S::Active | S::PartiallyFilled, T::Cancel) => Some(S::Cancelled),
                (S::Pending | S::Active | S::PartiallyFilled, T::Expire) => Some(S::Expired),

                _ => None,
            }
        }
    }
}

/// A committed status move, reported back to callers and turned into events.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusChange {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

impl StatusChange {
    /// The change added or removed liquidity from the book.
    pub fn affects_book(&self) -> bool {
        self.old_status.is_resting() || self.new_status.is_resting()
    }
}

// ============================================================================
// Order Draft
// ============================================================================

/// Caller-supplied fields of a new order, before validation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderDraft {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub time_in_force: TimeInForce,
    pub notes: Option<String>,
}

impl OrderDraft {
    pub fn new(
        account_id: impl Into<AccountId>,
        product_id: impl Into<ProductId>,
        side: Side,
        quantity: Quantity,
        price: Price,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            product_id: product_id.into(),
            side,
            quantity,
            price,
            time_in_force,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

// ============================================================================
// Order Entity
// ============================================================================

/// An order record. Fill state and status are private: they only move through
/// the transition methods below, which enforce the state machine and the
/// `filled + remaining == quantity` invariant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub time_in_force: TimeInForce,
    pub expires_at: Option<DateTime<Utc>>,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
    /// Engine-wide submission sequence, breaks creation-time ties
    pub sequence: u64,
    pub notes: Option<String>,

    filled_quantity: Quantity,
    remaining_quantity: Quantity,
    status: OrderStatus,
    approved_by: Option<AccountId>,
    approved_at: Option<DateTime<Utc>>,
    /// Why the order was rejected or cancelled
    status_reason: Option<String>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Order {
    /// Build a freshly submitted order from an already validated draft.
    pub(crate) fn open(
        draft: OrderDraft,
        requires_approval: bool,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        let status = if requires_approval {
            OrderStatus::Pending
        } else {
            OrderStatus::Active
        };

        Self {
            id: OrderId::new(),
            account_id: draft.account_id,
            product_id: draft.product_id,
            side: draft.side,
            price: draft.price,
            quantity: draft.quantity,
            time_in_force: draft.time_in_force,
            expires_at,
            requires_approval,
            created_at: now,
            sequence,
            notes: draft.notes,
            filled_quantity: Quantity::ZERO,
            remaining_quantity: draft.quantity,
            status,
            approved_by: None,
            approved_at: None,
            status_reason: None,
            updated_at: now,
            version: 0,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn filled_quantity(&self) -> Quantity {
        self.filled_quantity
    }

    pub fn remaining_quantity(&self) -> Quantity {
        self.remaining_quantity
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn approved_by(&self) -> Option<&AccountId> {
        self.approved_by.as_ref()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    /// Reason recorded by a rejection or a cancellation, whichever ended the order.
    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    /// Set only on rejected orders.
    pub fn rejection_reason(&self) -> Option<&str> {
        match self.status {
            OrderStatus::Rejected => self.status_reason(),
            _ => None,
        }
    }

    /// Set only on cancelled orders that were given a reason.
    pub fn cancellation_reason(&self) -> Option<&str> {
        match self.status {
            OrderStatus::Cancelled => self.status_reason(),
            _ => None,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Optimistic-concurrency version, bumped by the store on every commit.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Resting with quantity left, i.e. eligible for the matcher.
    pub fn is_matchable(&self) -> bool {
        self.status.is_resting() && self.remaining_quantity.is_positive()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at.is_some_and(|at| at <= now)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn apply(
        &mut self,
        transition: OrderStateTransition,
        now: DateTime<Utc>,
    ) -> EngineResult<StatusChange> {
        let old_status = self.status;
        let new_status =
            old_status
                .transition(transition)
                .ok_or(EngineError::InvalidTransition {
                    order_id: self.id,
                    from: old_status,
                    action: transition.verb(),
                })?;

        self.status = new_status;
        self.updated_at = now;

        Ok(StatusChange {
            order_id: self.id,
            product_id: self.product_id.clone(),
            old_status,
            new_status,
        })
    }

    pub(crate) fn approve(
        &mut self,
        approver: AccountId,
        now: DateTime<Utc>,
    ) -> EngineResult<StatusChange> {
        let change = self.apply(OrderStateTransition::Approve, now)?;
        self.approved_by = Some(approver);
        self.approved_at = Some(now);
        Ok(change)
    }

    pub(crate) fn reject(&mut self, reason: String, now: DateTime<Utc>) -> EngineResult<StatusChange> {
        let change = self.apply(OrderStateTransition::Reject, now)?;
        self.status_reason = Some(reason);
        Ok(change)
    }

    pub(crate) fn cancel(
        &mut self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<StatusChange> {
        let change = self.apply(OrderStateTransition::Cancel, now)?;
        if reason.is_some() {
            self.status_reason = reason;
        }
        Ok(change)
    }

    pub(crate) fn expire(&mut self, now: DateTime<Utc>) -> EngineResult<StatusChange> {
        self.apply(OrderStateTransition::Expire, now)
    }

    /// Add an execution to the fill state.
    ///
    /// Returns `None` when the status did not move (a further partial fill of
    /// an already partially filled order).
    pub(crate) fn record_fill(
        &mut self,
        executed: Quantity,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<StatusChange>> {
        if !executed.is_positive() || executed > self.remaining_quantity {
            return Err(EngineError::Overfill {
                order_id: self.id,
                requested: executed.to_string(),
                remaining: self.remaining_quantity.to_string(),
            });
        }

        let filled = self.filled_quantity.checked_add(executed)?;
        let remaining = self.quantity.checked_sub(filled)?;
        let transition = if remaining.is_zero() {
            OrderStateTransition::Fill
        } else {
            OrderStateTransition::PartialFill
        };

        let change = self.apply(transition, now)?;
        self.filled_quantity = filled;
        self.remaining_quantity = remaining;

        Ok((change.old_status != change.new_status).then_some(change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: i64) -> Quantity {
        Quantity::from_integer(n).unwrap()
    }

    fn new_order(pending: bool, quantity: i64) -> Order {
        Order::open(
            OrderDraft::new(
                "trader1",
                "WIDGET",
                Side::Buy,
                qty(quantity),
                Price::from_integer(100).unwrap(),
                TimeInForce::GoodTillCancel,
            ),
            pending,
            None,
            Utc::now(),
            0,
        )
    }

    #[test]
    fn test_order_creation() {
        let order = new_order(false, 10);
        assert_eq!(order.status(), OrderStatus::Active);
        assert_eq!(order.remaining_quantity(), qty(10));
        assert_eq!(order.filled_quantity(), Quantity::ZERO);

        let pending = new_order(true, 10);
        assert_eq!(pending.status(), OrderStatus::Pending);
        assert!(pending.requires_approval);
    }

    #[test]
    fn test_record_fill_progression() {
        let mut order = new_order(false, 10);
        let now = Utc::now();

        let change = order.record_fill(qty(3), now).unwrap().unwrap();
        assert_eq!(change.old_status, OrderStatus::Active);
        assert_eq!(change.new_status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_quantity(), qty(7));

        // still partially filled: no status change reported
        assert!(order.record_fill(qty(2), now).unwrap().is_none());

        let change = order.record_fill(qty(5), now).unwrap().unwrap();
        assert_eq!(change.new_status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity(), qty(10));
        assert!(order.remaining_quantity().is_zero());
    }

    #[test]
    fn test_overfill_protection() {
        let mut order = new_order(false, 5);
        let err = order.record_fill(qty(6), Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::Overfill { .. }));
        assert_eq!(order.filled_quantity(), Quantity::ZERO);
        assert_eq!(order.status(), OrderStatus::Active);
    }

    #[test]
    fn test_pending_order_cannot_fill() {
        let mut order = new_order(true, 5);
        let err = order.record_fill(qty(1), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: OrderStatus::Pending,
                ..
            }
        ));
        assert_eq!(order.remaining_quantity(), qty(5));
    }

    #[test]
    fn test_approve_only_from_pending() {
        let mut pending = new_order(true, 5);
        pending
            .approve(AccountId::from("admin"), Utc::now())
            .unwrap();
        assert_eq!(pending.status(), OrderStatus::Active);
        assert_eq!(pending.approved_by(), Some(&AccountId::from("admin")));

        let err = pending
            .approve(AccountId::from("admin"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { action: "approve", .. }));
    }

    #[test]
    fn test_cancel_keeps_reason() {
        let mut order = new_order(false, 5);
        order
            .cancel(Some("changed my mind".to_string()), Utc::now())
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason(), Some("changed my mind"));
        assert_eq!(order.rejection_reason(), None);
        assert_eq!(order.status_reason(), Some("changed my mind"));
        assert!(order.cancel(None, Utc::now()).is_err());
    }

    #[test]
    fn test_reject_reason_is_not_a_cancellation_reason() {
        let mut pending = new_order(true, 5);
        pending.reject("over limit".to_string(), Utc::now()).unwrap();
        assert_eq!(pending.rejection_reason(), Some("over limit"));
        assert_eq!(pending.cancellation_reason(), None);
    }

    #[test]
    fn test_terminal_states_are_final() {
        use OrderStateTransition::*;

        for status in [
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            for transition in [Approve, Reject, PartialFill, Fill, Cancel, Expire] {
                assert_eq!(status.transition(transition), None);
            }
        }
    }

    #[test]
    fn prop_transitions_never_move_backwards() {
        use OrderStateTransition::*;

        fn rank(status: OrderStatus) -> u8 {
            match status {
                OrderStatus::Pending => 0,
                OrderStatus::Active => 1,
                OrderStatus::PartiallyFilled => 2,
                _ => 3,
            }
        }

        fn prop(steps: Vec<u8>) -> bool {
            let all = [Approve, Reject, PartialFill, Fill, Cancel, Expire];
            let mut status = OrderStatus::Pending;
            for step in steps {
                let transition = all[step as usize % all.len()];
                if let Some(next) = status.transition(transition) {
                    if rank(next) < rank(status) || status.is_terminal() {
                        return false;
                    }
                    status = next;
                }
            }
            true
        }

        quickcheck::QuickCheck::new().quickcheck(prop as fn(Vec<u8>) -> bool);
    }
}
