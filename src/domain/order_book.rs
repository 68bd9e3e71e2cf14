// ============================================================================
// Order Book Snapshot
// ============================================================================

use crate::numeric::{Price, Volume};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::ProductId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Immutable point-in-time view of a product's resting liquidity.
///
/// Snapshots are never updated: each match cycle or book-affecting change
/// publishes a new one with the next per-product `sequence`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderBookSnapshot {
    pub product_id: ProductId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    /// Price → summed remaining quantity of resting buy orders
    pub bid_levels: BTreeMap<Price, Volume>,
    /// Price → summed remaining quantity of resting sell orders
    pub ask_levels: BTreeMap<Price, Volume>,
    pub total_bid_quantity: Volume,
    pub total_ask_quantity: Volume,
}

impl OrderBookSnapshot {
    pub fn empty(product_id: ProductId, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            product_id,
            sequence,
            timestamp,
            best_bid: None,
            best_ask: None,
            bid_levels: BTreeMap::new(),
            ask_levels: BTreeMap::new(),
            total_bid_quantity: Volume::ZERO,
            total_ask_quantity: Volume::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bid_levels.is_empty() && self.ask_levels.is_empty()
    }

    /// Current spread (ask - bid)
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => ask.checked_sub(bid).ok(),
            _ => None,
        }
    }

    /// Midpoint of best bid and best ask
    pub fn mid_price(&self) -> Option<Price> {
        let (bid, ask) = (self.best_bid?, self.best_ask?);
        let half = Price::from_raw(Price::SCALE / 2);
        // bid + (ask - bid) / 2 stays in range whenever both prices do
        let half_spread = ask.checked_sub(bid).ok()?.checked_mul(half).ok()?;
        bid.checked_add(half_spread).ok()
    }

    /// Best `levels` bid levels, highest price first
    pub fn bid_depth(&self, levels: usize) -> Vec<(Price, Volume)> {
        self.bid_levels
            .iter()
            .rev()
            .take(levels)
            .map(|(price, qty)| (*price, *qty))
            .collect()
    }

    /// Best `levels` ask levels, lowest price first
    pub fn ask_depth(&self, levels: usize) -> Vec<(Price, Volume)> {
        self.ask_levels
            .iter()
            .take(levels)
            .map(|(price, qty)| (*price, *qty))
            .collect()
    }
}
