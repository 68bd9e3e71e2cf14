// ============================================================================
// Order Store
// Order records, their fill state and the versioned commit used by every
// mutation after creation
// ============================================================================

use crate::domain::{AccountId, Order, OrderDraft, OrderId, ProductId, Side, StatusChange};
use crate::error::{EngineError, EngineResult};
use crate::numeric::Quantity;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct StoreInner {
    orders: HashMap<OrderId, Order>,
    /// Insertion order per product
    by_product: HashMap<ProductId, Vec<OrderId>>,
    by_account: HashMap<AccountId, Vec<OrderId>>,
}

impl StoreInner {
    fn index(&mut self, order: &Order) {
        self.by_product
            .entry(order.product_id.clone())
            .or_default()
            .push(order.id);
        self.by_account
            .entry(order.account_id.clone())
            .or_default()
            .push(order.id);
    }
}

// ============================================================================
// Staged Orders
// ============================================================================

/// Working copies of the orders one commit touches.
///
/// Each copy keeps the version it was read at; [`OrderStore::commit`] only
/// succeeds if the stored record still has that version.
#[derive(Debug, Default, Clone)]
pub struct StagedOrders {
    orders: Vec<Order>,
    index: HashMap<OrderId, usize>,
}

impl StagedOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a copy. A second copy of an already staged order is ignored.
    pub fn stage(&mut self, order: Order) {
        if self.index.contains_key(&order.id) {
            return;
        }
        self.index.insert(order.id, self.orders.len());
        self.orders.push(order);
    }

    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.index.get(order_id).map(|&i| &self.orders[i])
    }

    pub fn get_mut(&mut self, order_id: &OrderId) -> EngineResult<&mut Order> {
        match self.index.get(order_id) {
            Some(&i) => Ok(&mut self.orders[i]),
            None => Err(EngineError::OrderNotFound(*order_id)),
        }
    }

    /// Add an execution to a staged order's fill state.
    pub fn update_fill(
        &mut self,
        order_id: &OrderId,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<StatusChange>> {
        self.get_mut(order_id)?.record_fill(quantity, now)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

// ============================================================================
// Store View
// ============================================================================

/// Read access to the store as it will look once a commit is applied.
pub struct StoreView<'a> {
    inner: &'a StoreInner,
    staged: &'a StagedOrders,
}

impl<'a> StoreView<'a> {
    pub fn get(&self, order_id: &OrderId) -> Option<&'a Order> {
        self.staged
            .get(order_id)
            .or_else(|| self.inner.orders.get(order_id))
    }

    /// Every order of a product, staged copies taking precedence.
    pub fn product_orders(&self, product_id: &ProductId) -> Vec<&'a Order> {
        let staged = self.staged;
        let inner = self.inner;

        let stored = inner
            .by_product
            .get(product_id)
            .into_iter()
            .flatten()
            .filter_map(|id| staged.get(id).or_else(|| inner.orders.get(id)));

        let inserted = staged
            .iter()
            .filter(|o| &o.product_id == product_id && !inner.orders.contains_key(&o.id));

        stored.chain(inserted).collect()
    }

    /// Post-commit copies of the staged orders, versions already bumped.
    pub fn staged(&self) -> impl Iterator<Item = &'a Order> {
        self.staged.iter()
    }
}

// ============================================================================
// Order Store
// ============================================================================

/// All orders ever submitted, indexed by id, product and account.
///
/// Records are never removed. Reads hand out clones; the only way to change
/// a stored record is [`OrderStore::commit`].
pub struct OrderStore {
    inner: RwLock<StoreInner>,
    sequence: AtomicU64,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Build a new order record from a validated draft.
    ///
    /// The record is not stored until it goes through [`OrderStore::commit`].
    pub fn submit(
        &self,
        draft: OrderDraft,
        requires_approval: bool,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Order {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        Order::open(draft, requires_approval, expires_at, now, sequence)
    }

    pub fn get(&self, order_id: &OrderId) -> Option<Order> {
        self.inner.read().orders.get(order_id).cloned()
    }

    pub fn require(&self, order_id: &OrderId) -> EngineResult<Order> {
        self.get(order_id)
            .ok_or(EngineError::OrderNotFound(*order_id))
    }

    /// Matchable orders on one side of a product's book.
    pub fn resting(&self, product_id: &ProductId, side: Side) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .by_product
            .get(product_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.orders.get(id))
            .filter(|o| o.side == side && o.is_matchable())
            .cloned()
            .collect()
    }

    /// Non-terminal orders whose expiry is at or before `now`.
    pub fn expiring(&self, now: DateTime<Utc>) -> Vec<Order> {
        self.inner
            .read()
            .orders
            .values()
            .filter(|o| o.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Non-terminal orders owned by an account, in submission order.
    pub fn open_orders_for_account(&self, account_id: &AccountId) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .by_account
            .get(account_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.orders.get(id))
            .filter(|o| !o.status().is_terminal())
            .cloned()
            .collect()
    }

    pub fn orders_for_product(&self, product_id: &ProductId) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .by_product
            .get(product_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.orders.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().orders.is_empty()
    }

    /// Run `f` against a consistent view of the committed state.
    pub fn view<T>(&self, f: impl FnOnce(&StoreView<'_>) -> T) -> T {
        let inner = self.inner.read();
        let staged = StagedOrders::new();
        f(&StoreView {
            inner: &inner,
            staged: &staged,
        })
    }

    /// Apply staged orders atomically.
    ///
    /// Under the write lock: every staged copy must still carry the version
    /// of the stored record (new orders must be absent), versions are bumped,
    /// then `finalize` sees the post-commit view. Only when `finalize`
    /// succeeds are the copies written back; on any error the store is left
    /// exactly as it was.
    pub fn commit<T>(
        &self,
        mut staged: StagedOrders,
        finalize: impl FnOnce(&StoreView<'_>) -> EngineResult<T>,
    ) -> EngineResult<(T, Vec<Order>)> {
        let mut inner = self.inner.write();

        for order in staged.iter() {
            if let Some(current) = inner.orders.get(&order.id) {
                if current.version() != order.version() {
                    return Err(EngineError::ConcurrencyConflict {
                        order_id: order.id,
                        expected: order.version(),
                        found: current.version(),
                    });
                }
            } else if order.version() != 0 {
                return Err(EngineError::OrderNotFound(order.id));
            }
        }

        for order in staged.orders.iter_mut() {
            order.bump_version();
        }

        let value = finalize(&StoreView {
            inner: &inner,
            staged: &staged,
        })?;

        for order in &staged.orders {
            if inner
                .orders
                .insert(order.id, order.clone())
                .is_none()
            {
                inner.index(order);
            }
        }

        Ok((value, staged.orders))
    }
}
