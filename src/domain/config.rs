// ============================================================================
// Engine Configuration
// Approval, fee, validation and derived-data settings for a matching engine
// ============================================================================

use crate::numeric::{Price, Quantity};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use rust_decimal::Decimal;

use super::price_history::BarInterval;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Approval Policy
// ============================================================================

/// Orders strictly above either limit are held as `pending` until an
/// approver activates or rejects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ApprovalPolicy {
    pub max_quantity: Quantity,
    pub max_price: Price,
}

impl ApprovalPolicy {
    pub fn requires_approval(&self, quantity: Quantity, price: Price) -> bool {
        quantity > self.max_quantity || price > self.max_price
    }

    /// Never hold anything for approval.
    pub fn disabled() -> Self {
        Self {
            max_quantity: Quantity::MAX,
            max_price: Price::MAX,
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            max_quantity: Quantity::from_raw(1_000 * Quantity::SCALE),
            max_price: Price::from_raw(10_000 * Price::SCALE),
        }
    }
}

// ============================================================================
// Self-Trade Policy
// ============================================================================

/// What the matcher does when both sides belong to the same account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SelfTradePolicy {
    /// Match like any other pair
    #[default]
    Allow,
    /// Leave the resting order untouched and move on to the next candidate
    SkipResting,
}

// ============================================================================
// Engine Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub approval: ApprovalPolicy,

    pub self_trade: SelfTradePolicy,

    /// Fraction of executed notional charged to each side (0.001 = 10 bps)
    pub fee_rate: Decimal,

    /// Optional: price tick size; None means no tick enforcement
    pub tick_size: Option<Price>,

    /// Optional: lot size; None means no lot enforcement
    pub lot_size: Option<Quantity>,

    /// Price-history bar width
    pub bar_interval: BarInterval,

    /// UTC time at which `day` orders expire
    pub day_order_cutoff: NaiveTime,

    /// How long a cached order-book snapshot may be served
    pub book_cache_ttl: TimeDelta,

    /// Times a match cycle is recomputed after a concurrency conflict
    pub conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval: ApprovalPolicy::default(),
            self_trade: SelfTradePolicy::Allow,
            fee_rate: Decimal::ZERO,
            tick_size: None,
            lot_size: None,
            bar_interval: BarInterval::Day,
            day_order_cutoff: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            book_cache_ttl: TimeDelta::seconds(60),
            conflict_retries: 1,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_self_trade(mut self, policy: SelfTradePolicy) -> Self {
        self.self_trade = policy;
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn with_tick_size(mut self, tick: Price) -> Self {
        self.tick_size = Some(tick);
        self
    }

    pub fn with_lot_size(mut self, lot: Quantity) -> Self {
        self.lot_size = Some(lot);
        self
    }

    pub fn with_bar_interval(mut self, interval: BarInterval) -> Self {
        self.bar_interval = interval;
        self
    }

    pub fn with_day_order_cutoff(mut self, cutoff: NaiveTime) -> Self {
        self.day_order_cutoff = cutoff;
        self
    }

    pub fn with_book_cache_ttl(mut self, ttl: TimeDelta) -> Self {
        self.book_cache_ttl = ttl;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err("Fee rate must be in [0, 1)".to_string());
        }

        if let Some(tick) = self.tick_size {
            if !tick.is_positive() {
                return Err("Tick size must be positive".to_string());
            }
        }

        if let Some(lot) = self.lot_size {
            if !lot.is_positive() {
                return Err("Lot size must be positive".to_string());
            }
        }

        if !self.approval.max_quantity.is_positive() || !self.approval.max_price.is_positive() {
            return Err("Approval thresholds must be positive".to_string());
        }

        if self.book_cache_ttl < TimeDelta::zero() {
            return Err("Book cache TTL cannot be negative".to_string());
        }

        Ok(())
    }

    /// Expiry of a `day` order submitted at `now`: today's cut-off, or
    /// tomorrow's when `now` is already at or past it.
    pub fn day_order_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let cutoff = now.date_naive().and_time(self.day_order_cutoff).and_utc();
        if now >= cutoff {
            cutoff + TimeDelta::days(1)
        } else {
            cutoff
        }
    }
}

// ============================================================================
// Preset Configurations
// ============================================================================

impl EngineConfig {
    /// Every order goes straight to `active`.
    pub fn without_approval() -> Self {
        Self::default().with_approval(ApprovalPolicy::disabled())
    }

    /// Cent ticks, whole-unit lots, self-trades skipped.
    pub fn retail_exchange() -> Self {
        Self::default()
            .with_tick_size(Price::from_raw(Price::SCALE / 100))
            .with_lot_size(Quantity::ONE)
            .with_self_trade(SelfTradePolicy::SkipResting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_thresholds() {
        let policy = ApprovalPolicy::default();
        let qty = |n| Quantity::from_integer(n).unwrap();
        let px = |n| Price::from_integer(n).unwrap();

        assert!(!policy.requires_approval(qty(1000), px(10_000)));
        assert!(policy.requires_approval(qty(1001), px(1)));
        assert!(policy.requires_approval(qty(1), "10000.01".parse().unwrap()));
        assert!(!ApprovalPolicy::disabled().requires_approval(qty(1_000_000), px(1_000_000)));
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new()
            .with_fee_rate(Decimal::new(1, 3))
            .with_tick_size("0.05".parse().unwrap())
            .with_bar_interval(BarInterval::Hour);

        assert_eq!(config.fee_rate, Decimal::new(1, 3));
        assert_eq!(config.tick_size, Some("0.05".parse().unwrap()));
        assert_eq!(config.bar_interval, BarInterval::Hour);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(EngineConfig::new().with_fee_rate(Decimal::ONE).validate().is_err());
        assert!(EngineConfig::new()
            .with_tick_size(Price::ZERO)
            .validate()
            .is_err());
        assert!(EngineConfig::retail_exchange().validate().is_ok());
    }

    #[test]
    fn test_day_order_expiry_rolls_after_cutoff() {
        let config = EngineConfig::default();

        let morning = Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap();
        assert_eq!(
            config.day_order_expiry(morning),
            Utc.with_ymd_and_hms(2024, 3, 5, 16, 0, 0).unwrap()
        );

        let evening = Utc.with_ymd_and_hms(2024, 3, 5, 16, 0, 0).unwrap();
        assert_eq!(
            config.day_order_expiry(evening),
            Utc.with_ymd_and_hms(2024, 3, 6, 16, 0, 0).unwrap()
        );
    }
}
