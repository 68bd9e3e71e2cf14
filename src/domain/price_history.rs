// ============================================================================
// Price History Bars
// ============================================================================

use crate::numeric::{NumericError, NumericResult, Price, Quantity, Volume};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use super::ProductId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Width of one price-history bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BarInterval {
    Minute,
    Hour,
    /// One bar per UTC calendar day
    Day,
}

impl BarInterval {
    pub fn duration(&self) -> TimeDelta {
        match self {
            BarInterval::Minute => TimeDelta::minutes(1),
            BarInterval::Hour => TimeDelta::hours(1),
            BarInterval::Day => TimeDelta::days(1),
        }
    }

    /// Start of the bucket containing `when` (floor to the interval boundary).
    pub fn bucket_start(&self, when: DateTime<Utc>) -> DateTime<Utc> {
        // only fails for durations that do not fit in nanoseconds
        when.duration_trunc(self.duration()).unwrap_or(when)
    }
}

/// OHLCV bar for one product and one period.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PriceBar {
    pub product_id: ProductId,
    /// Bucket start; the period key together with `product_id`
    pub period_start: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Volume,
    pub trade_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl PriceBar {
    /// Bar opened by the first trade of a period.
    pub fn open(
        product_id: ProductId,
        period_start: DateTime<Utc>,
        price: Price,
        quantity: Quantity,
        when: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            period_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: quantity.to_decimal(),
            trade_count: 1,
            updated_at: when,
        }
    }

    /// Fold a later trade of the same period into the bar.
    pub fn apply_trade(
        &mut self,
        price: Price,
        quantity: Quantity,
        when: DateTime<Utc>,
    ) -> NumericResult<()> {
        self.volume = self
            .volume
            .checked_add(quantity.to_decimal())
            .ok_or(NumericError::Overflow)?;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.trade_count += 1;
        self.updated_at = when;
        Ok(())
    }

    /// OHLC ordering holds (`low <= open, close <= high`).
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.high >= self.open
            && self.high >= self.close
            && self.volume >= Volume::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bucket_start_alignment() {
        let when = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 12).unwrap();
        assert_eq!(
            BarInterval::Day.bucket_start(when),
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
        );
        assert_eq!(
            BarInterval::Hour.bucket_start(when),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()
        );
        assert_eq!(
            BarInterval::Minute.bucket_start(when),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 0).unwrap()
        );
    }

    #[test]
    fn test_bar_updates() {
        let when = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let px = |n| Price::from_integer(n).unwrap();

        let mut bar = PriceBar::open(ProductId::from("WIDGET"), when, px(100), px(2), when);
        bar.apply_trade(px(104), px(1), when).unwrap();
        bar.apply_trade(px(97), px(3), when).unwrap();

        assert_eq!(bar.open, px(100));
        assert_eq!(bar.high, px(104));
        assert_eq!(bar.low, px(97));
        assert_eq!(bar.close, px(97));
        assert_eq!(bar.volume, Volume::from(6));
        assert_eq!(bar.trade_count, 3);
        assert!(bar.is_valid());
    }

    #[test]
    fn test_volume_past_single_quantity_range() {
        let when = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        let big = Quantity::from_integer(5_000_000_000).unwrap();

        let mut bar = PriceBar::open(ProductId::from("WIDGET"), when, Price::ONE, big, when);
        bar.apply_trade(Price::ONE, big, when).unwrap();

        assert_eq!(bar.volume, Volume::from(10_000_000_000i64));
        assert_eq!(bar.trade_count, 2);
    }
}
