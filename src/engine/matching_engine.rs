// ============================================================================
// Matching Engine
// Inbound operations, the atomic match cycle and event emission
// ============================================================================

use super::book_aggregator::OrderBookAggregator;
use super::concurrency::{retry_on_conflict, ProductLocks};
use super::lifecycle::{LifecycleController, TransitionOutcome};
use super::price_tracker::PriceHistoryTracker;
use crate::domain::{
    AccountId, EngineConfig, Order, OrderBookSnapshot, OrderDraft, OrderId, OrderStatus,
    PriceBar, Product, ProductId, ProductRegistry, Side, StatusChange, TimeInForce, Transaction,
};
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::interfaces::{
    Clock, CommitBatch, EngineEvent, EventHandler, Journal, MatchResult, MatchingAlgorithm,
};
use crate::numeric::{Price, Quantity};
use crate::store::{OrderStore, StagedOrders, TransactionLedger};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// What a submission, approval or match retry produced.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Committed state of the order the call was about
    pub order: Order,
    /// Transactions appended by the match cycle, two per match
    pub transactions: Vec<Arc<Transaction>>,
    /// Events in emission order
    pub events: Vec<EngineEvent>,
}

/// What a cancellation, rejection or sweep produced.
#[derive(Debug, Clone, Default)]
pub struct LifecycleReport {
    pub orders: Vec<Order>,
    pub events: Vec<EngineEvent>,
}

struct CycleOutcome {
    order: Order,
    transactions: Vec<Arc<Transaction>>,
    events: Vec<EngineEvent>,
}

/// Continuous double-auction matching engine.
///
/// Every operation that touches a product's book runs under that product's
/// lock. State changes are journaled before they become visible, and events
/// are handed to the [`EventHandler`] only after the commit succeeded.
pub struct MatchingEngine {
    config: EngineConfig,

    /// `config.fee_rate` in the engine's fixed-point representation
    fee_rate: Price,

    products: ProductRegistry,

    store: Arc<OrderStore>,

    ledger: TransactionLedger,

    books: Arc<OrderBookAggregator>,

    prices: PriceHistoryTracker,

    lifecycle: LifecycleController,

    locks: Arc<ProductLocks>,

    /// Pluggable matching algorithm
    algorithm: Box<dyn MatchingAlgorithm>,

    journal: Arc<dyn Journal>,

    clock: Arc<dyn Clock>,

    /// Event handler for processing events
    event_handler: Arc<dyn EventHandler>,
}

impl MatchingEngine {
    /// Create a new matching engine
    pub fn new(
        config: EngineConfig,
        algorithm: Box<dyn MatchingAlgorithm>,
        journal: Arc<dyn Journal>,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;
        let fee_rate = Price::from_decimal(config.fee_rate)
            .map_err(|e| EngineError::Config(format!("fee rate {}: {e}", config.fee_rate)))?;

        let store = Arc::new(OrderStore::new());
        let books = Arc::new(OrderBookAggregator::new(config.book_cache_ttl));
        let locks = Arc::new(ProductLocks::new());
        let lifecycle = LifecycleController::new(
            Arc::clone(&store),
            Arc::clone(&books),
            Arc::clone(&journal),
            Arc::clone(&locks),
            config.conflict_retries,
        );

        tracing::debug!(algorithm = algorithm.name(), "matching engine created");

        Ok(Self {
            fee_rate,
            products: ProductRegistry::new(),
            store,
            ledger: TransactionLedger::new(),
            books,
            prices: PriceHistoryTracker::new(config.bar_interval),
            lifecycle,
            locks,
            algorithm,
            journal,
            clock,
            event_handler,
            config,
        })
    }

    // ========================================================================
    // Products
    // ========================================================================

    pub fn register_product(&self, product_id: impl Into<ProductId>, name: impl Into<String>) -> Product {
        let product = self.products.register(product_id.into(), name);
        tracing::info!(product_id = %product.id, "product registered");
        product
    }

    /// Open or close a product for new orders. Orders already resting keep
    /// matching.
    pub fn set_tradeable(&self, product_id: &ProductId, tradeable: bool) -> EngineResult<()> {
        if !self.products.set_tradeable(product_id, tradeable) {
            return Err(ValidationError::UnknownProduct(product_id.clone()).into());
        }
        tracing::info!(product_id = %product_id, tradeable, "product tradeable flag changed");
        Ok(())
    }

    pub fn product(&self, product_id: &ProductId) -> Option<Product> {
        self.products.get(product_id)
    }

    // ========================================================================
    // Submission and matching
    // ========================================================================

    /// Submit an order and return its id.
    pub fn submit_order(
        &self,
        account_id: impl Into<AccountId>,
        product_id: impl Into<ProductId>,
        side: Side,
        quantity: Quantity,
        price: Price,
        time_in_force: TimeInForce,
    ) -> EngineResult<OrderId> {
        let draft = OrderDraft::new(account_id, product_id, side, quantity, price, time_in_force);
        self.submit(draft).map(|report| report.order.id)
    }

    /// Validate, store and (when active) match a new order.
    ///
    /// The order is stored in its own commit. If the follow-up match cycle
    /// fails, the order stays stored and `MatchCycleFailed` is returned;
    /// [`MatchingEngine::retry_match`] reruns the cycle.
    pub fn submit(&self, draft: OrderDraft) -> EngineResult<ExecutionReport> {
        let now = self.clock.now();
        self.validate_draft(&draft, now)?;

        let requires_approval = self
            .config
            .approval
            .requires_approval(draft.quantity, draft.price);
        let expires_at = self.expiry_for(draft.time_in_force, now);

        let lock = self.locks.handle(&draft.product_id);
        let _guard = lock.lock();

        let order = self.store.submit(draft, requires_approval, expires_at, now);
        let order_id = order.id;

        let mut staged = StagedOrders::new();
        staged.stage(order);
        let ((), committed) = self.store.commit(staged, |view| {
            let mut batch = CommitBatch::new(now);
            batch.orders = view.staged().cloned().collect();
            self.journal.persist(&batch)?;
            Ok(())
        })?;
        let order = committed
            .into_iter()
            .next()
            .ok_or(EngineError::OrderNotFound(order_id))?;

        tracing::info!(
            order_id = %order.id,
            product_id = %order.product_id,
            account_id = %order.account_id,
            side = %order.side,
            quantity = %order.quantity,
            price = %order.price,
            status = %order.status(),
            "order submitted"
        );

        let submitted = EngineEvent::OrderSubmitted {
            order_id,
            product_id: order.product_id.clone(),
            status: order.status(),
            timestamp: now,
        };
        self.event_handler.on_event(submitted.clone());

        let mut report = ExecutionReport {
            order,
            transactions: Vec::new(),
            events: vec![submitted],
        };

        if report.order.is_matchable() {
            let cycle = self.match_cycle(&order_id, true)?;
            report.order = cycle.order;
            report.transactions = cycle.transactions;
            report.events.extend(cycle.events);
        }

        Ok(report)
    }

    /// Rerun the match cycle of an order, e.g. after `MatchCycleFailed`.
    pub fn retry_match(&self, order_id: &OrderId) -> EngineResult<ExecutionReport> {
        let product_id = self.store.require(order_id)?.product_id;
        let lock = self.locks.handle(&product_id);
        let _guard = lock.lock();

        let cycle = self.match_cycle(order_id, true)?;
        Ok(ExecutionReport {
            order: cycle.order,
            transactions: cycle.transactions,
            events: cycle.events,
        })
    }

    /// Run one match cycle with conflict retry and emit its events.
    ///
    /// With `publish_idle`, a cycle that finds no match still publishes a
    /// snapshot so a newly resting order shows up on the book.
    fn match_cycle(&self, order_id: &OrderId, publish_idle: bool) -> EngineResult<CycleOutcome> {
        let outcome = retry_on_conflict(self.config.conflict_retries, || {
            self.try_match_cycle(order_id, publish_idle)
        })
        .map_err(|source| {
            tracing::warn!(order_id = %order_id, error = %source, "match cycle failed");
            EngineError::MatchCycleFailed {
                order_id: *order_id,
                source: Box::new(source),
            }
        })?;

        self.event_handler.on_events(outcome.events.clone());
        Ok(outcome)
    }

    fn try_match_cycle(&self, order_id: &OrderId, publish_idle: bool) -> EngineResult<CycleOutcome> {
        let now = self.clock.now();
        let incoming = self.store.require(order_id)?;
        let candidates = self
            .store
            .resting(&incoming.product_id, incoming.side.opposite());
        let matches = self.algorithm.match_order(&incoming, &candidates)?;

        if matches.is_empty() {
            let mut events = Vec::new();
            if publish_idle && incoming.is_matchable() {
                let snapshot = self.lifecycle.refresh_book(&incoming.product_id, now)?;
                events.push(EngineEvent::OrderBookUpdated {
                    product_id: incoming.product_id.clone(),
                    snapshot,
                });
            }
            return Ok(CycleOutcome {
                order: incoming,
                transactions: Vec::new(),
                events,
            });
        }

        let mut prepared = Vec::with_capacity(matches.len() * 2);
        let result = self.execute_matches(&incoming, &candidates, &matches, now, &mut prepared);
        if result.is_err() {
            self.ledger.release(&prepared);
        }
        result
    }

    /// Apply a match plan: stage fills, prepare transactions and bars, then
    /// commit everything, including the rebuilt book, as one unit.
    fn execute_matches(
        &self,
        incoming: &Order,
        candidates: &[Order],
        matches: &[MatchResult],
        now: DateTime<Utc>,
        prepared: &mut Vec<Transaction>,
    ) -> EngineResult<CycleOutcome> {
        let product_id = &incoming.product_id;
        let mut staged = StagedOrders::new();
        let mut initial: HashMap<OrderId, OrderStatus> = HashMap::new();

        staged.stage(incoming.clone());
        initial.insert(incoming.id, incoming.status());

        for planned in matches {
            let resting = candidates
                .iter()
                .find(|o| o.id == planned.resting_order_id)
                .ok_or(EngineError::OrderNotFound(planned.resting_order_id))?;
            staged.stage(resting.clone());
            initial.entry(resting.id).or_insert(resting.status());

            self.lifecycle
                .record_fill(&mut staged, &incoming.id, planned.quantity, now)?;
            self.lifecycle
                .record_fill(&mut staged, &resting.id, planned.quantity, now)?;

            prepared.extend(self.ledger.prepare_pair(
                product_id,
                incoming,
                resting,
                planned.price,
                planned.quantity,
                self.fee_rate,
                now,
            )?);
        }

        let bars = self.prices.stage(
            product_id,
            matches.iter().map(|m| (m.price, m.quantity, now)),
        )?;

        let changes: Vec<StatusChange> = staged
            .iter()
            .filter_map(|order| {
                let old_status = *initial.get(&order.id)?;
                (old_status != order.status()).then(|| StatusChange {
                    order_id: order.id,
                    product_id: order.product_id.clone(),
                    old_status,
                    new_status: order.status(),
                })
            })
            .collect();

        let ((transactions, snapshot), committed) = self.store.commit(staged, |view| {
            let snapshot = self
                .books
                .build(product_id, view.product_orders(product_id), now)?;

            let batch = CommitBatch {
                orders: view.staged().cloned().collect(),
                transactions: prepared.clone(),
                snapshots: vec![snapshot.clone()],
                price_bars: bars.clone(),
                committed_at: Some(now),
            };
            self.journal.persist(&batch)?;

            let transactions = self.ledger.append(batch.transactions);
            self.prices.apply(batch.price_bars);
            Ok((transactions, self.books.publish(snapshot)))
        })?;

        let order = committed
            .into_iter()
            .find(|o| o.id == incoming.id)
            .ok_or(EngineError::OrderNotFound(incoming.id))?;

        tracing::info!(
            order_id = %order.id,
            product_id = %product_id,
            algorithm = self.algorithm.name(),
            matches = matches.len(),
            filled = %order.filled_quantity(),
            remaining = %order.remaining_quantity(),
            status = %order.status(),
            "match cycle committed"
        );

        let events = cycle_events(&transactions, &changes, bars, snapshot, now);
        Ok(CycleOutcome {
            order,
            transactions,
            events,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Activate a pending order and match it.
    pub fn approve_order(
        &self,
        order_id: &OrderId,
        approver_id: impl Into<AccountId>,
    ) -> EngineResult<ExecutionReport> {
        let product_id = self.store.require(order_id)?.product_id;
        let lock = self.locks.handle(&product_id);
        let _guard = lock.lock();

        let now = self.clock.now();
        let outcome = self.lifecycle.approve(order_id, approver_id.into(), now)?;
        let mut report = self.lifecycle_report(outcome, now);

        let cycle = self.match_cycle(order_id, true)?;
        report.events.extend(cycle.events);
        Ok(ExecutionReport {
            order: cycle.order,
            transactions: cycle.transactions,
            events: report.events,
        })
    }

    pub fn reject_order(&self, order_id: &OrderId, reason: &str) -> EngineResult<LifecycleReport> {
        let product_id = self.store.require(order_id)?.product_id;
        let lock = self.locks.handle(&product_id);
        let _guard = lock.lock();

        let now = self.clock.now();
        let outcome = self.lifecycle.reject(order_id, reason, now)?;
        Ok(self.lifecycle_report(outcome, now))
    }

    pub fn cancel_order(
        &self,
        order_id: &OrderId,
        reason: Option<&str>,
    ) -> EngineResult<LifecycleReport> {
        let product_id = self.store.require(order_id)?.product_id;
        let lock = self.locks.handle(&product_id);
        let _guard = lock.lock();

        let now = self.clock.now();
        let outcome = self.lifecycle.cancel(order_id, reason, now)?;
        Ok(self.lifecycle_report(outcome, now))
    }

    /// Cancel every open order of an account.
    pub fn cancel_all_for_account(
        &self,
        account_id: &AccountId,
        reason: Option<&str>,
    ) -> EngineResult<LifecycleReport> {
        let now = self.clock.now();
        let outcome = self.lifecycle.cancel_all_for_account(account_id, reason, now)?;
        Ok(self.lifecycle_report(outcome, now))
    }

    /// Expire every non-terminal order due at or before `now`. Idempotent.
    ///
    /// When the sweep fails part-way, the expiries it did commit are still
    /// delivered to the event handler before the error is returned.
    pub fn run_expiration_sweep(&self, now: DateTime<Utc>) -> EngineResult<LifecycleReport> {
        let sweep = self.lifecycle.expire_sweep(now);
        let report = self.lifecycle_report(sweep.outcome, now);
        match sweep.error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Turn committed transitions into events and hand them to the handler.
    fn lifecycle_report(&self, outcome: TransitionOutcome, now: DateTime<Utc>) -> LifecycleReport {
        let mut events: Vec<EngineEvent> = outcome
            .changes
            .iter()
            .map(|change| EngineEvent::status_changed(change, now))
            .collect();
        events.extend(
            outcome
                .snapshots
                .into_iter()
                .map(|snapshot| EngineEvent::OrderBookUpdated {
                    product_id: snapshot.product_id.clone(),
                    snapshot,
                }),
        );

        self.event_handler.on_events(events.clone());
        LifecycleReport {
            orders: outcome.orders,
            events,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.store.get(order_id)
    }

    pub fn open_orders_for_account(&self, account_id: &AccountId) -> Vec<Order> {
        self.store.open_orders_for_account(account_id)
    }

    pub fn transactions_for_order(&self, order_id: &OrderId) -> Vec<Arc<Transaction>> {
        self.ledger.for_order(order_id)
    }

    /// Every transaction in ledger order.
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        self.ledger.all()
    }

    /// Current book of a product (served from cache while fresh).
    pub fn latest_snapshot(&self, product_id: &ProductId) -> Option<Arc<OrderBookSnapshot>> {
        self.books.latest(product_id, self.clock.now())
    }

    pub fn snapshot_history(&self, product_id: &ProductId) -> Vec<Arc<OrderBookSnapshot>> {
        self.books.history(product_id)
    }

    pub fn price_bars(&self, product_id: &ProductId) -> Vec<PriceBar> {
        self.prices.bars(product_id)
    }

    pub fn price_bar(&self, product_id: &ProductId, when: DateTime<Utc>) -> Option<PriceBar> {
        self.prices.bar(product_id, when)
    }

    pub fn last_price(&self, product_id: &ProductId) -> Option<Price> {
        self.prices.last_price(product_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn validate_draft(&self, draft: &OrderDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if !draft.quantity.is_positive() {
            return Err(ValidationError::NonPositiveQuantity(draft.quantity.to_string()));
        }

        if !draft.price.is_positive() {
            return Err(ValidationError::NonPositivePrice(draft.price.to_string()));
        }

        if let Some(tick) = self.config.tick_size {
            if !draft.price.is_multiple_of(tick).unwrap_or(false) {
                return Err(ValidationError::OffTick {
                    price: draft.price.to_string(),
                    tick: tick.to_string(),
                });
            }
        }

        if let Some(lot) = self.config.lot_size {
            if !draft.quantity.is_multiple_of(lot).unwrap_or(false) {
                return Err(ValidationError::OffLot {
                    quantity: draft.quantity.to_string(),
                    lot: lot.to_string(),
                });
            }
        }

        self.products.ensure_tradeable(&draft.product_id)?;

        if let TimeInForce::GoodTillDate(expires_at) = draft.time_in_force {
            if expires_at <= now {
                return Err(ValidationError::ExpiryInPast);
            }
        }

        Ok(())
    }

    fn expiry_for(&self, time_in_force: TimeInForce, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match time_in_force {
            TimeInForce::Day => Some(self.config.day_order_expiry(now)),
            TimeInForce::GoodTillCancel => None,
            TimeInForce::GoodTillDate(expires_at) => Some(expires_at),
        }
    }
}

/// Events of one committed match cycle: trades, then status changes, then
/// price bars, then the new book.
fn cycle_events(
    transactions: &[Arc<Transaction>],
    changes: &[StatusChange],
    bars: Vec<PriceBar>,
    snapshot: Arc<OrderBookSnapshot>,
    now: DateTime<Utc>,
) -> Vec<EngineEvent> {
    let trades = transactions.iter().map(|t| EngineEvent::TradeExecuted {
        transaction_id: t.id,
        order_id: t.order_id,
        counter_order_id: t.counter_order_id,
        price: t.executed_price,
        quantity: t.quantity,
        timestamp: t.executed_at,
    });
    let statuses = changes
        .iter()
        .map(|change| EngineEvent::status_changed(change, now));
    let bars = bars.into_iter().map(|bar| EngineEvent::PriceBarUpdated { bar });
    let book = std::iter::once(EngineEvent::OrderBookUpdated {
        product_id: snapshot.product_id.clone(),
        snapshot,
    });

    trades.chain(statuses).chain(bars).chain(book).collect()
}
