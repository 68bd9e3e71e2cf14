// ============================================================================
// Lifecycle Controller
// Order state transitions, the expiration sweep and book refreshes
// ============================================================================

use super::book_aggregator::OrderBookAggregator;
use super::concurrency::{retry_on_conflict, ProductLocks};
use crate::domain::{
    AccountId, Order, OrderBookSnapshot, OrderId, ProductId, StatusChange,
};
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::interfaces::{CommitBatch, Journal};
use crate::numeric::Quantity;
use crate::store::{OrderStore, StagedOrders};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of one or more committed lifecycle transitions.
#[derive(Debug, Clone, Default)]
pub struct TransitionOutcome {
    /// Committed state of every transitioned order
    pub orders: Vec<Order>,
    pub changes: Vec<StatusChange>,
    /// Snapshots published because a transition moved the book
    pub snapshots: Vec<Arc<OrderBookSnapshot>>,
}

impl TransitionOutcome {
    fn merge(&mut self, other: TransitionOutcome) {
        self.orders.extend(other.orders);
        self.changes.extend(other.changes);
        self.snapshots.extend(other.snapshots);
    }
}

/// What an expiration sweep committed, plus the first failure it hit.
///
/// Expiries commit one at a time, so a failure part-way through leaves the
/// earlier ones in place; `outcome` always lists them.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub outcome: TransitionOutcome,
    pub error: Option<EngineError>,
}

impl SweepOutcome {
    pub fn into_result(self) -> EngineResult<TransitionOutcome> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.outcome),
        }
    }
}

/// Applies the order state machine through versioned, journaled commits.
///
/// Single-order methods expect the caller to hold the product lock of the
/// order. `cancel_all_for_account` and `expire_sweep` take product locks
/// themselves.
pub struct LifecycleController {
    store: Arc<OrderStore>,
    books: Arc<OrderBookAggregator>,
    journal: Arc<dyn Journal>,
    locks: Arc<ProductLocks>,
    conflict_retries: u32,
}

impl LifecycleController {
    pub fn new(
        store: Arc<OrderStore>,
        books: Arc<OrderBookAggregator>,
        journal: Arc<dyn Journal>,
        locks: Arc<ProductLocks>,
        conflict_retries: u32,
    ) -> Self {
        Self {
            store,
            books,
            journal,
            locks,
            conflict_retries,
        }
    }

    // ========================================================================
    // Single-order transitions
    // ========================================================================

    /// `pending -> active`, recording the approver.
    ///
    /// No snapshot is published: the caller follows up with a match cycle,
    /// which publishes the book once the order has matched.
    pub fn approve(
        &self,
        order_id: &OrderId,
        approver: AccountId,
        now: DateTime<Utc>,
    ) -> EngineResult<TransitionOutcome> {
        let outcome = self.transition(order_id, now, false, |order| {
            order.approve(approver.clone(), now)
        })?;
        tracing::info!(order_id = %order_id, approver = %approver, "order approved");
        Ok(outcome)
    }

    /// `pending -> rejected`. The reason must not be blank.
    pub fn reject(
        &self,
        order_id: &OrderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<TransitionOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingRejectionReason.into());
        }

        let outcome =
            self.transition(order_id, now, true, |order| order.reject(reason.to_string(), now))?;
        tracing::info!(order_id = %order_id, reason, "order rejected");
        Ok(outcome)
    }

    pub fn cancel(
        &self,
        order_id: &OrderId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<TransitionOutcome> {
        let reason = reason.map(str::to_string);
        let outcome =
            self.transition(order_id, now, true, |order| order.cancel(reason.clone(), now))?;
        tracing::info!(order_id = %order_id, "order cancelled");
        Ok(outcome)
    }

    /// Add an execution to a staged order. Used by the match cycle; the fill
    /// only becomes visible when the cycle commits.
    pub fn record_fill(
        &self,
        staged: &mut StagedOrders,
        order_id: &OrderId,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<StatusChange>> {
        let change = staged.update_fill(order_id, quantity, now)?;
        tracing::trace!(order_id = %order_id, %quantity, "fill staged");
        Ok(change)
    }

    fn transition(
        &self,
        order_id: &OrderId,
        now: DateTime<Utc>,
        rebuild_book: bool,
        f: impl FnMut(&mut Order) -> EngineResult<StatusChange>,
    ) -> EngineResult<TransitionOutcome> {
        let product_id = self.store.require(order_id)?.product_id;
        self.transition_orders(
            &product_id,
            std::slice::from_ref(order_id),
            now,
            rebuild_book,
            false,
            f,
        )
    }

    /// Transition several orders of one product in a single commit.
    ///
    /// With `rebuild_book`, a snapshot is published when any transition moved
    /// the book. With `skip_terminal`, orders that reached a terminal status
    /// since the caller selected them are left out instead of failing the
    /// batch.
    fn transition_orders(
        &self,
        product_id: &ProductId,
        order_ids: &[OrderId],
        now: DateTime<Utc>,
        rebuild_book: bool,
        skip_terminal: bool,
        mut f: impl FnMut(&mut Order) -> EngineResult<StatusChange>,
    ) -> EngineResult<TransitionOutcome> {
        retry_on_conflict(self.conflict_retries, || {
            let mut staged = StagedOrders::new();
            let mut changes = Vec::with_capacity(order_ids.len());

            for order_id in order_ids {
                let order = self.store.require(order_id)?;
                if skip_terminal && order.status().is_terminal() {
                    continue;
                }
                staged.stage(order);
                changes.push(f(staged.get_mut(order_id)?)?);
            }

            if staged.is_empty() {
                return Ok(TransitionOutcome::default());
            }

            let rebuild = rebuild_book && changes.iter().any(StatusChange::affects_book);
            let (snapshot, orders) = self.store.commit(staged, |view| {
                let snapshot = if rebuild {
                    Some(self.books.build(product_id, view.product_orders(product_id), now)?)
                } else {
                    None
                };

                let mut batch = CommitBatch::new(now);
                batch.orders = view.staged().cloned().collect();
                batch.snapshots.extend(snapshot.clone());
                self.journal.persist(&batch)?;

                Ok(snapshot.map(|s| self.books.publish(s)))
            })?;

            Ok(TransitionOutcome {
                orders,
                changes,
                snapshots: snapshot.into_iter().collect(),
            })
        })
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Cancel every open order of an account, one commit per product.
    pub fn cancel_all_for_account(
        &self,
        account_id: &AccountId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<TransitionOutcome> {
        let mut by_product: BTreeMap<ProductId, Vec<OrderId>> = BTreeMap::new();
        for order in self.store.open_orders_for_account(account_id) {
            by_product.entry(order.product_id).or_default().push(order.id);
        }

        let reason = reason.map(str::to_string);
        let mut outcome = TransitionOutcome::default();
        for (product_id, order_ids) in by_product {
            let lock = self.locks.handle(&product_id);
            let _guard = lock.lock();
            outcome.merge(self.transition_orders(
                &product_id,
                &order_ids,
                now,
                true,
                true,
                |order| order.cancel(reason.clone(), now),
            )?);
        }

        tracing::info!(
            account_id = %account_id,
            cancelled = outcome.changes.len(),
            "cancelled all open orders for account"
        );
        Ok(outcome)
    }

    /// Expire every non-terminal order with `expires_at <= now`.
    ///
    /// Each order is expired in its own commit after re-checking it is still
    /// due, so a sweep racing with matching never expires a filled order and
    /// a second sweep at the same instant finds nothing. Books of products
    /// that lost resting orders are rebuilt afterwards, even when an expiry
    /// failed, and every book is attempted even when one refresh fails.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = TransitionOutcome::default();
        let mut touched = BTreeSet::new();
        let mut failure: Option<EngineError> = None;

        for candidate in self.store.expiring(now) {
            match self.expire_one(&candidate.id, now) {
                Ok(Some((order, change))) => {
                    if change.affects_book() {
                        touched.insert(change.product_id.clone());
                    }
                    outcome.orders.push(order);
                    outcome.changes.push(change);
                },
                Ok(None) => {},
                Err(err) => {
                    tracing::warn!(order_id = %candidate.id, %err, "expiration failed");
                    failure = Some(err);
                    break;
                },
            }
        }

        for product_id in touched {
            let lock = self.locks.handle(&product_id);
            let _guard = lock.lock();
            match self.refresh_book(&product_id, now) {
                Ok(snapshot) => outcome.snapshots.push(snapshot),
                Err(err) => {
                    tracing::warn!(product_id = %product_id, %err, "book refresh after expiry failed");
                    failure.get_or_insert(err);
                },
            }
        }

        tracing::info!(
            expired = outcome.changes.len(),
            books_rebuilt = outcome.snapshots.len(),
            failed = failure.is_some(),
            "expiration sweep finished"
        );

        SweepOutcome {
            outcome,
            error: failure,
        }
    }

    fn expire_one(
        &self,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<(Order, StatusChange)>> {
        retry_on_conflict(self.conflict_retries, || {
            let current = self.store.require(order_id)?;
            if !current.is_expired_at(now) {
                return Ok(None);
            }

            let mut staged = StagedOrders::new();
            staged.stage(current);
            let change = staged.get_mut(order_id)?.expire(now)?;

            let ((), mut orders) = self.store.commit(staged, |view| {
                let mut batch = CommitBatch::new(now);
                batch.orders = view.staged().cloned().collect();
                self.journal.persist(&batch)?;
                Ok(())
            })?;

            Ok(orders.pop().map(|order| (order, change)))
        })
    }

    /// Rebuild and publish a product's book from committed state.
    ///
    /// The caller holds the product lock.
    pub fn refresh_book(
        &self,
        product_id: &ProductId,
        now: DateTime<Utc>,
    ) -> EngineResult<Arc<OrderBookSnapshot>> {
        let snapshot = self
            .store
            .view(|view| self.books.build(product_id, view.product_orders(product_id), now))?;

        let mut batch = CommitBatch::new(now);
        batch.snapshots.push(snapshot.clone());
        self.journal.persist(&batch)?;

        Ok(self.books.publish(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderDraft, OrderStatus, Side, TimeInForce};
    use crate::interfaces::InMemoryJournal;
    use crate::numeric::Price;
    use chrono::{TimeDelta, TimeZone};

    struct Fixture {
        store: Arc<OrderStore>,
        books: Arc<OrderBookAggregator>,
        journal: Arc<InMemoryJournal>,
        lifecycle: LifecycleController,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(OrderStore::new());
        let books = Arc::new(OrderBookAggregator::new(TimeDelta::seconds(60)));
        let journal = Arc::new(InMemoryJournal::new());
        let lifecycle = LifecycleController::new(
            Arc::clone(&store),
            Arc::clone(&books),
            journal.clone(),
            Arc::new(ProductLocks::new()),
            1,
        );
        Fixture {
            store,
            books,
            journal,
            lifecycle,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()
    }

    fn place(
        fx: &Fixture,
        account: &str,
        pending: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Order {
        place_in(&fx.store, account, pending, expires_at)
    }

    fn place_in(
        store: &OrderStore,
        account: &str,
        pending: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Order {
        let order = store.submit(
            OrderDraft::new(
                account,
                "WIDGET",
                Side::Buy,
                Quantity::from_integer(5).unwrap(),
                Price::from_integer(100).unwrap(),
                TimeInForce::GoodTillCancel,
            ),
            pending,
            expires_at,
            t0(),
        );
        let mut staged = StagedOrders::new();
        staged.stage(order);
        let ((), mut committed) = store.commit(staged, |_| Ok(())).unwrap();
        committed.remove(0)
    }

    #[test]
    fn test_approve_only_from_pending() {
        let fx = fixture();
        let pending = place(&fx, "alice", true, None);

        let outcome = fx
            .lifecycle
            .approve(&pending.id, AccountId::from("boss"), t0())
            .unwrap();
        let approved = &outcome.orders[0];
        assert_eq!(approved.status(), OrderStatus::Active);
        assert_eq!(approved.approved_by(), Some(&AccountId::from("boss")));
        assert_eq!(approved.approved_at(), Some(t0()));
        assert!(outcome.snapshots.is_empty());

        let err = fx
            .lifecycle
            .approve(&pending.id, AccountId::from("boss"), t0())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_reject_requires_reason() {
        let fx = fixture();
        let pending = place(&fx, "alice", true, None);

        let err = fx.lifecycle.reject(&pending.id, "   ", t0()).unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation(ValidationError::MissingRejectionReason)
        );
        assert_eq!(fx.store.get(&pending.id).unwrap().status(), OrderStatus::Pending);

        let outcome = fx.lifecycle.reject(&pending.id, "limit breach", t0()).unwrap();
        assert_eq!(outcome.orders[0].status(), OrderStatus::Rejected);
        assert_eq!(outcome.orders[0].rejection_reason(), Some("limit breach"));
        // pending orders never rested, so no snapshot
        assert!(outcome.snapshots.is_empty());
    }

    #[test]
    fn test_cancel_is_journaled_and_rebuilds_book() {
        let fx = fixture();
        let active = place(&fx, "alice", false, None);

        let outcome = fx
            .lifecycle
            .cancel(&active.id, Some("changed my mind"), t0())
            .unwrap();
        assert_eq!(outcome.orders[0].status(), OrderStatus::Cancelled);
        assert!(outcome.snapshots[0].is_empty());

        let batches = fx.journal.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].orders[0].version(), 2);
        assert_eq!(batches[0].snapshots.len(), 1);

        let err = fx.lifecycle.cancel(&active.id, None, t0()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_cancel_all_for_account() {
        let fx = fixture();
        let first = place(&fx, "alice", false, None);
        let second = place(&fx, "alice", true, None);
        let other = place(&fx, "bob", false, None);

        let outcome = fx
            .lifecycle
            .cancel_all_for_account(&AccountId::from("alice"), None, t0())
            .unwrap();
        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(fx.store.get(&first.id).unwrap().status(), OrderStatus::Cancelled);
        assert_eq!(fx.store.get(&second.id).unwrap().status(), OrderStatus::Cancelled);
        assert_eq!(fx.store.get(&other.id).unwrap().status(), OrderStatus::Active);
        assert_eq!(fx.books.history(&ProductId::from("WIDGET")).len(), 1);
    }

    #[test]
    fn test_expire_sweep_is_idempotent() {
        let fx = fixture();
        let due = place(&fx, "alice", false, Some(t0() + TimeDelta::hours(1)));
        let later = place(&fx, "bob", false, Some(t0() + TimeDelta::hours(5)));
        let forever = place(&fx, "carol", false, None);

        let sweep_at = t0() + TimeDelta::hours(1);
        let first = fx.lifecycle.expire_sweep(sweep_at).into_result().unwrap();
        assert_eq!(first.changes.len(), 1);
        assert_eq!(first.changes[0].order_id, due.id);
        assert_eq!(first.snapshots.len(), 1);

        let second = fx.lifecycle.expire_sweep(sweep_at).into_result().unwrap();
        assert!(second.changes.is_empty());
        assert!(second.snapshots.is_empty());

        assert_eq!(fx.store.get(&due.id).unwrap().status(), OrderStatus::Expired);
        assert_eq!(fx.store.get(&later.id).unwrap().status(), OrderStatus::Active);
        assert_eq!(fx.store.get(&forever.id).unwrap().status(), OrderStatus::Active);
    }

    #[test]
    fn test_record_fill_stages_only() {
        let fx = fixture();
        let order = place(&fx, "alice", false, None);

        let mut staged = StagedOrders::new();
        staged.stage(order.clone());
        let change = fx
            .lifecycle
            .record_fill(&mut staged, &order.id, Quantity::from_integer(2).unwrap(), t0())
            .unwrap()
            .unwrap();
        assert_eq!(change.new_status, OrderStatus::PartiallyFilled);
        assert_eq!(fx.store.get(&order.id).unwrap().status(), OrderStatus::Active);
    }

    #[test]
    fn test_sweep_rechecks_order_filled_after_selection() {
        let fx = fixture();
        let due_at = t0() + TimeDelta::hours(1);
        let order = place(&fx, "alice", false, Some(due_at));

        let selected = fx.store.expiring(due_at);
        assert_eq!(selected.len(), 1);

        // a match cycle fills the order before the sweep gets to it
        let mut staged = StagedOrders::new();
        staged.stage(order.clone());
        fx.lifecycle
            .record_fill(&mut staged, &order.id, order.quantity, t0())
            .unwrap();
        fx.store.commit(staged, |_| Ok(())).unwrap();

        assert!(fx.lifecycle.expire_one(&selected[0].id, due_at).unwrap().is_none());
        assert_eq!(fx.store.get(&order.id).unwrap().status(), OrderStatus::Filled);
        assert!(fx.journal.is_empty());
    }

    #[test]
    fn test_fill_racing_an_expiry_is_recomputed() {
        let fx = fixture();
        let due_at = t0() + TimeDelta::hours(1);
        let order = place(&fx, "alice", false, Some(due_at));
        let mut attempts = 0;

        let result = retry_on_conflict(1, || {
            attempts += 1;
            let mut staged = StagedOrders::new();
            staged.stage(fx.store.require(&order.id)?);
            fx.lifecycle.record_fill(
                &mut staged,
                &order.id,
                Quantity::from_integer(2).unwrap(),
                t0(),
            )?;
            if attempts == 1 {
                // the sweep commits between the read and the fill commit
                fx.lifecycle.expire_one(&order.id, due_at)?;
            }
            fx.store.commit(staged, |_| Ok(()))
        });

        assert_eq!(attempts, 2);
        // recomputed against the expired order, so the fill is refused
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition { from: OrderStatus::Expired, .. })
        ));
        let stored = fx.store.get(&order.id).unwrap();
        assert_eq!(stored.status(), OrderStatus::Expired);
        assert_eq!(stored.filled_quantity(), Quantity::ZERO);
    }

    #[test]
    fn test_sweep_reports_commits_made_before_a_failure() {
        let store = Arc::new(OrderStore::new());
        let journal = Arc::new(SnapshotFailingJournal::default());
        let lifecycle = LifecycleController::new(
            Arc::clone(&store),
            Arc::new(OrderBookAggregator::new(TimeDelta::seconds(60))),
            journal.clone(),
            Arc::new(ProductLocks::new()),
            1,
        );
        let due_at = t0() + TimeDelta::hours(1);
        let first = place_in(&store, "alice", false, Some(due_at));
        let second = place_in(&store, "bob", false, Some(due_at));

        let sweep = lifecycle.expire_sweep(due_at);

        assert!(matches!(sweep.error, Some(EngineError::Persistence(_))));
        let expired: Vec<_> = sweep.outcome.changes.iter().map(|c| c.order_id).collect();
        assert_eq!(expired.len(), 2);
        assert!(expired.contains(&first.id) && expired.contains(&second.id));
        assert!(sweep.outcome.snapshots.is_empty());
        assert_eq!(journal.order_batches.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(store.get(&first.id).unwrap().status(), OrderStatus::Expired);
    }

    /// Persists order batches, refuses snapshot-only ones.
    #[derive(Default)]
    struct SnapshotFailingJournal {
        order_batches: std::sync::atomic::AtomicUsize,
    }

    impl Journal for SnapshotFailingJournal {
        fn persist(&self, batch: &CommitBatch) -> Result<(), crate::error::PersistenceError> {
            if batch.orders.is_empty() && !batch.snapshots.is_empty() {
                return Err(crate::error::PersistenceError::new("snapshot table unavailable"));
            }
            self.order_batches
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }
}
