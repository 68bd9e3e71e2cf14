// ============================================================================
// Journal Interface
// Persistence boundary: one batch per atomic unit of work
// ============================================================================

use crate::domain::{Order, OrderBookSnapshot, PriceBar, Transaction};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything one commit writes.
///
/// `orders` hold the post-commit state of every touched order (with the
/// version they will carry once applied). A match cycle fills all four
/// collections; a lifecycle transition only `orders` and, when the book
/// moved, `snapshots`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommitBatch {
    pub orders: Vec<Order>,
    pub transactions: Vec<Transaction>,
    pub snapshots: Vec<OrderBookSnapshot>,
    pub price_bars: Vec<PriceBar>,
    pub committed_at: Option<DateTime<Utc>>,
}

impl CommitBatch {
    pub fn new(committed_at: DateTime<Utc>) -> Self {
        Self {
            committed_at: Some(committed_at),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.transactions.is_empty()
            && self.snapshots.is_empty()
            && self.price_bars.is_empty()
    }
}

/// Durable store for committed state.
///
/// `persist` runs before the batch is applied in memory; an error aborts the
/// commit and leaves the engine untouched.
pub trait Journal: Send + Sync {
    fn persist(&self, batch: &CommitBatch) -> Result<(), PersistenceError>;
}

/// Discards every batch
pub struct NoOpJournal;

impl Journal for NoOpJournal {
    fn persist(&self, _batch: &CommitBatch) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Keeps every batch in memory. Useful for replay checks and tests.
#[derive(Default)]
pub struct InMemoryJournal {
    batches: Mutex<Vec<CommitBatch>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<CommitBatch> {
        self.batches.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl Journal for InMemoryJournal {
    fn persist(&self, batch: &CommitBatch) -> Result<(), PersistenceError> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

/// Appends each batch as one JSON line to a writer (file, socket, buffer).
#[cfg(feature = "serde")]
pub struct JsonLinesJournal<W: std::io::Write + Send> {
    writer: Mutex<W>,
}

#[cfg(feature = "serde")]
impl<W: std::io::Write + Send> JsonLinesJournal<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[cfg(feature = "serde")]
impl<W: std::io::Write + Send> Journal for JsonLinesJournal<W> {
    fn persist(&self, batch: &CommitBatch) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(batch)
            .map_err(|e| PersistenceError::new(format!("encode batch: {e}")))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| PersistenceError::new(format!("write batch: {e}")))
    }
}
