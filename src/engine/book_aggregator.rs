// ============================================================================
// Order Book Aggregator
// Depth snapshots rebuilt from resting orders, with a read-through cache
// ============================================================================

use crate::domain::{Order, OrderBookSnapshot, ProductId, Side};
use crate::numeric::{NumericError, NumericResult, Volume};
use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache key: entity kind plus entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: &'static str,
    pub id: String,
}

impl CacheKey {
    pub const ORDER_BOOK: &'static str = "order_book";

    pub fn order_book(product_id: &ProductId) -> Self {
        Self {
            kind: Self::ORDER_BOOK,
            id: product_id.as_str().to_string(),
        }
    }
}

struct CacheEntry {
    snapshot: Arc<OrderBookSnapshot>,
    cached_at: DateTime<Utc>,
}

/// Snapshot history per product, ordered by per-product sequence.
pub struct OrderBookAggregator {
    snapshots: SkipMap<(ProductId, u64), Arc<OrderBookSnapshot>>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    cache_ttl: TimeDelta,
}

impl OrderBookAggregator {
    pub fn new(cache_ttl: TimeDelta) -> Self {
        Self {
            snapshots: SkipMap::new(),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Aggregate the resting orders among `orders` into a new snapshot.
    ///
    /// Only active and partially filled orders count. The snapshot takes the
    /// next sequence for the product but is not published.
    pub fn build<'a>(
        &self,
        product_id: &ProductId,
        orders: impl IntoIterator<Item = &'a Order>,
        timestamp: DateTime<Utc>,
    ) -> NumericResult<OrderBookSnapshot> {
        let mut snapshot =
            OrderBookSnapshot::empty(product_id.clone(), self.next_sequence(product_id), timestamp);

        for order in orders {
            if &order.product_id != product_id || !order.is_matchable() {
                continue;
            }

            let remaining = order.remaining_quantity().to_decimal();
            let (levels, total) = match order.side {
                Side::Buy => (&mut snapshot.bid_levels, &mut snapshot.total_bid_quantity),
                Side::Sell => (&mut snapshot.ask_levels, &mut snapshot.total_ask_quantity),
            };
            let level = levels.entry(order.price).or_insert(Volume::ZERO);
            *level = level.checked_add(remaining).ok_or(NumericError::Overflow)?;
            *total = total.checked_add(remaining).ok_or(NumericError::Overflow)?;
        }

        snapshot.best_bid = snapshot.bid_levels.keys().next_back().copied();
        snapshot.best_ask = snapshot.ask_levels.keys().next().copied();
        Ok(snapshot)
    }

    fn next_sequence(&self, product_id: &ProductId) -> u64 {
        self.last_entry(product_id)
            .map(|snapshot| snapshot.sequence + 1)
            .unwrap_or(1)
    }

    fn last_entry(&self, product_id: &ProductId) -> Option<Arc<OrderBookSnapshot>> {
        self.snapshots
            .range((product_id.clone(), 0)..=(product_id.clone(), u64::MAX))
            .next_back()
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Store a snapshot and invalidate the cached copy for its product.
    pub fn publish(&self, snapshot: OrderBookSnapshot) -> Arc<OrderBookSnapshot> {
        let key = CacheKey::order_book(&snapshot.product_id);
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(
            (snapshot.product_id.clone(), snapshot.sequence),
            Arc::clone(&snapshot),
        );
        self.cache.write().remove(&key);
        snapshot
    }

    /// Most recent snapshot, served from the cache while it is fresh.
    pub fn latest(&self, product_id: &ProductId, now: DateTime<Utc>) -> Option<Arc<OrderBookSnapshot>> {
        let key = CacheKey::order_book(product_id);

        if let Some(entry) = self.cache.read().get(&key) {
            if now - entry.cached_at < self.cache_ttl {
                return Some(Arc::clone(&entry.snapshot));
            }
        }

        let mut cache = self.cache.write();
        let snapshot = self.last_entry(product_id)?;
        cache.insert(
            key,
            CacheEntry {
                snapshot: Arc::clone(&snapshot),
                cached_at: now,
            },
        );
        Some(snapshot)
    }

    /// Every published snapshot of a product, oldest first.
    pub fn history(&self, product_id: &ProductId) -> Vec<Arc<OrderBookSnapshot>> {
        self.snapshots
            .range((product_id.clone(), 0)..=(product_id.clone(), u64::MAX))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn is_cached(&self, product_id: &ProductId) -> bool {
        self.cache
            .read()
            .contains_key(&CacheKey::order_book(product_id))
    }
}
