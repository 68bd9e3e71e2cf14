// ============================================================================
// Price History Tracker
// OHLCV bars per product per period
// ============================================================================

use crate::domain::{BarInterval, PriceBar, ProductId};
use crate::numeric::{NumericResult, Price, Quantity};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

pub struct PriceHistoryTracker {
    interval: BarInterval,
    bars: RwLock<BTreeMap<(ProductId, DateTime<Utc>), PriceBar>>,
}

impl PriceHistoryTracker {
    pub fn new(interval: BarInterval) -> Self {
        Self {
            interval,
            bars: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn interval(&self) -> BarInterval {
        self.interval
    }

    /// Fold one trade into its bar immediately.
    pub fn record_trade(
        &self,
        product_id: &ProductId,
        price: Price,
        quantity: Quantity,
        when: DateTime<Utc>,
    ) -> NumericResult<PriceBar> {
        let key = (product_id.clone(), self.interval.bucket_start(when));
        let mut bars = self.bars.write();
        let bar = next_bar(bars.get(&key), product_id, key.1, price, quantity, when)?;
        bars.insert(key, bar.clone());
        Ok(bar)
    }

    /// Compute the bars that `trades` would produce without storing them.
    ///
    /// Returns one updated bar per touched period, in period order.
    pub fn stage(
        &self,
        product_id: &ProductId,
        trades: impl IntoIterator<Item = (Price, Quantity, DateTime<Utc>)>,
    ) -> NumericResult<Vec<PriceBar>> {
        let mut staged: BTreeMap<DateTime<Utc>, PriceBar> = BTreeMap::new();
        let bars = self.bars.read();

        for (price, quantity, when) in trades {
            let period = self.interval.bucket_start(when);
            let bar = match staged.get(&period) {
                Some(bar) => next_bar(Some(bar), product_id, period, price, quantity, when)?,
                None => next_bar(
                    bars.get(&(product_id.clone(), period)),
                    product_id,
                    period,
                    price,
                    quantity,
                    when,
                )?,
            };
            staged.insert(period, bar);
        }

        Ok(staged.into_values().collect())
    }

    /// Store staged bars, replacing the previous state of their periods.
    pub fn apply(&self, staged: Vec<PriceBar>) {
        let mut bars = self.bars.write();
        for bar in staged {
            bars.insert((bar.product_id.clone(), bar.period_start), bar);
        }
    }

    /// Bar of the period containing `when`.
    pub fn bar(&self, product_id: &ProductId, when: DateTime<Utc>) -> Option<PriceBar> {
        let period = self.interval.bucket_start(when);
        self.bars
            .read()
            .get(&(product_id.clone(), period))
            .cloned()
    }

    /// All bars of a product, oldest first.
    pub fn bars(&self, product_id: &ProductId) -> Vec<PriceBar> {
        self.bars
            .read()
            .range(product_range(product_id))
            .map(|(_, bar)| bar.clone())
            .collect()
    }

    pub fn last_price(&self, product_id: &ProductId) -> Option<Price> {
        self.bars
            .read()
            .range(product_range(product_id))
            .next_back()
            .map(|(_, bar)| bar.close)
    }
}

fn product_range(product_id: &ProductId) -> RangeInclusive<(ProductId, DateTime<Utc>)> {
    (product_id.clone(), DateTime::<Utc>::MIN_UTC)..=(product_id.clone(), DateTime::<Utc>::MAX_UTC)
}

/// `existing` with one more trade, or a fresh bar when the period is empty.
fn next_bar(
    existing: Option<&PriceBar>,
    product_id: &ProductId,
    period: DateTime<Utc>,
    price: Price,
    quantity: Quantity,
    when: DateTime<Utc>,
) -> NumericResult<PriceBar> {
    match existing {
        Some(existing) => {
            let mut bar = existing.clone();
            bar.apply_trade(price, quantity, when)?;
            Ok(bar)
        },
        None => Ok(PriceBar::open(product_id.clone(), period, price, quantity, when)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Volume;
    use chrono::{TimeDelta, TimeZone};

    fn px(n: i64) -> Price {
        Price::from_integer(n).unwrap()
    }

    #[test]
    fn test_first_trade_opens_bar() {
        let tracker = PriceHistoryTracker::new(BarInterval::Day);
        let widget = ProductId::from("WIDGET");
        let when = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();

        let bar = tracker.record_trade(&widget, px(100), px(10), when).unwrap();
        assert_eq!(bar.open, px(100));
        assert_eq!(bar.high, px(100));
        assert_eq!(bar.low, px(100));
        assert_eq!(bar.close, px(100));
        assert_eq!(bar.volume, Volume::from(10));
        assert_eq!(
            bar.period_start,
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_later_trades_update_bar_and_new_day_opens_new_one() {
        let tracker = PriceHistoryTracker::new(BarInterval::Day);
        let widget = ProductId::from("WIDGET");
        let morning = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();

        tracker.record_trade(&widget, px(100), px(10), morning).unwrap();
        tracker
            .record_trade(&widget, px(104), px(2), morning + TimeDelta::hours(1))
            .unwrap();
        tracker
            .record_trade(&widget, px(95), px(1), morning + TimeDelta::hours(2))
            .unwrap();
        tracker
            .record_trade(&widget, px(99), px(5), morning + TimeDelta::days(1))
            .unwrap();

        let bars = tracker.bars(&widget);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].high, px(104));
        assert_eq!(bars[0].low, px(95));
        assert_eq!(bars[0].close, px(95));
        assert_eq!(bars[0].volume, Volume::from(13));
        assert_eq!(bars[1].open, px(99));
        assert_eq!(tracker.last_price(&widget), Some(px(99)));
        assert!(tracker.bars(&ProductId::from("GADGET")).is_empty());
    }

    #[test]
    fn test_stage_does_not_store() {
        let tracker = PriceHistoryTracker::new(BarInterval::Hour);
        let widget = ProductId::from("WIDGET");
        let when = Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).unwrap();

        let staged = tracker
            .stage(&widget, [(px(10), px(1), when), (px(12), px(1), when)])
            .unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].trade_count, 2);
        assert!(tracker.bar(&widget, when).is_none());

        tracker.apply(staged);
        assert_eq!(tracker.bar(&widget, when).unwrap().close, px(12));
    }
}
