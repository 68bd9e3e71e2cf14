// ============================================================================
// Transaction Ledger
// Append-only log of executions; the source of truth for fills
// ============================================================================

use crate::domain::{Order, OrderId, ProductId, Transaction, TransactionId};
use crate::numeric::{NumericError, NumericResult, Price, Quantity};
use chrono::{DateTime, Utc};
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Executions keyed by ledger sequence.
///
/// Appends happen only after the owning commit has been persisted. External
/// ids are reserved when a pair is prepared so two concurrent cycles can
/// never hand out the same one; a rolled-back cycle releases its
/// reservations.
pub struct TransactionLedger {
    entries: SkipMap<u64, Arc<Transaction>>,
    by_order: RwLock<HashMap<OrderId, Vec<u64>>>,
    external_ids: Mutex<HashSet<String>>,
    next_sequence: AtomicU64,
}

impl Default for TransactionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            by_order: RwLock::new(HashMap::new()),
            external_ids: Mutex::new(HashSet::new()),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Build the two transactions of one match, one per order.
    ///
    /// Both share price, quantity and timestamp. Each side pays
    /// `price * quantity * fee_rate`. Nothing is appended yet.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_pair(
        &self,
        product_id: &ProductId,
        incoming: &Order,
        resting: &Order,
        price: Price,
        quantity: Quantity,
        fee_rate: Price,
        executed_at: DateTime<Utc>,
    ) -> NumericResult<[Transaction; 2]> {
        let fee = fee_for(price, quantity, fee_rate)?;

        let side = |order: &Order, counter: &Order| {
            let id = self.reserve_id();
            Transaction {
                external_id: id.external_reference(),
                id,
                sequence: self.next_sequence.fetch_add(1, Ordering::AcqRel),
                product_id: product_id.clone(),
                order_id: order.id,
                counter_order_id: Some(counter.id),
                executed_price: price,
                quantity,
                fee,
                executed_at,
                executed_by: order.approved_by().cloned(),
            }
        };

        Ok([side(incoming, resting), side(resting, incoming)])
    }

    fn reserve_id(&self) -> TransactionId {
        let mut reserved = self.external_ids.lock();
        loop {
            let id = TransactionId::new();
            if reserved.insert(id.external_reference()) {
                return id;
            }
        }
    }

    /// Drop the external-id reservations of transactions that were never
    /// appended.
    pub fn release(&self, transactions: &[Transaction]) {
        let mut reserved = self.external_ids.lock();
        for transaction in transactions {
            reserved.remove(&transaction.external_id);
        }
    }

    pub fn append(&self, transactions: Vec<Transaction>) -> Vec<Arc<Transaction>> {
        let mut by_order = self.by_order.write();
        transactions
            .into_iter()
            .map(|transaction| {
                let transaction = Arc::new(transaction);
                by_order
                    .entry(transaction.order_id)
                    .or_default()
                    .push(transaction.sequence);
                self.entries
                    .insert(transaction.sequence, Arc::clone(&transaction));
                transaction
            })
            .collect()
    }

    pub fn get(&self, sequence: u64) -> Option<Arc<Transaction>> {
        self.entries.get(&sequence).map(|entry| Arc::clone(entry.value()))
    }

    /// Transactions recorded against an order, oldest first.
    pub fn for_order(&self, order_id: &OrderId) -> Vec<Arc<Transaction>> {
        let by_order = self.by_order.read();
        by_order
            .get(order_id)
            .into_iter()
            .flatten()
            .filter_map(|sequence| self.get(*sequence))
            .collect()
    }

    /// Sum of the quantities recorded against an order.
    pub fn filled_quantity(&self, order_id: &OrderId) -> NumericResult<Quantity> {
        Quantity::checked_sum(self.for_order(order_id).iter().map(|t| t.quantity))
    }

    /// Every transaction in ledger order.
    pub fn all(&self) -> Vec<Arc<Transaction>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `price * quantity * fee_rate`, with the notional formed in `Decimal`.
///
/// Only the fee itself has to fit a `Price`; the notional may not.
fn fee_for(price: Price, quantity: Quantity, fee_rate: Price) -> NumericResult<Price> {
    if fee_rate.is_zero() {
        return Ok(Price::ZERO);
    }

    let fee = price
        .to_decimal()
        .checked_mul(quantity.to_decimal())
        .and_then(|notional| notional.checked_mul(fee_rate.to_decimal()))
        .ok_or(NumericError::Overflow)?;
    Price::from_decimal_rounded(fee)
}
