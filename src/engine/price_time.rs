// ============================================================================
// Price/Time Priority Matching Algorithm (FIFO)
// Best price first, then earliest submission
// ============================================================================

use crate::domain::{Order, SelfTradePolicy, Side};
use crate::interfaces::{MatchResult, MatchResults, MatchingAlgorithm};
use crate::numeric::NumericResult;
use std::cmp::Ordering;

/// Price/Time Priority (FIFO) matching algorithm
///
/// Candidates are ranked by price (lowest ask first for an incoming buy,
/// highest bid first for an incoming sell), then by creation time, then by
/// submission sequence. Each execution takes `min(incoming remaining,
/// resting remaining)` at the resting order's price.
///
/// # Example
/// ```text
/// Book:  100 @ 1 (Order A, t=100)
///        100 @ 2 (Order B, t=101)
///
/// Incoming: Buy 1.5 @ 100
/// Result: Match 1.0 with A, then 0.5 with B
/// ```
pub struct PriceTimePriority {
    self_trade: SelfTradePolicy,
}

impl PriceTimePriority {
    pub fn new(self_trade: SelfTradePolicy) -> Self {
        Self { self_trade }
    }

    fn is_candidate(&self, incoming: &Order, resting: &Order) -> bool {
        resting.id != incoming.id
            && resting.side == incoming.side.opposite()
            && resting.product_id == incoming.product_id
            && resting.is_matchable()
            && self.prices_cross(incoming, resting.price)
            && !(self.self_trade == SelfTradePolicy::SkipResting
                && resting.account_id == incoming.account_id)
    }
}

impl Default for PriceTimePriority {
    fn default() -> Self {
        Self::new(SelfTradePolicy::default())
    }
}

/// Priority ordering of resting orders for an incoming order on `side`.
fn priority(side: Side, a: &Order, b: &Order) -> Ordering {
    let by_price = match side {
        Side::Buy => a.price.cmp(&b.price),
        Side::Sell => b.price.cmp(&a.price),
    };
    by_price
        .then(a.created_at.cmp(&b.created_at))
        .then(a.sequence.cmp(&b.sequence))
}

impl MatchingAlgorithm for PriceTimePriority {
    fn match_order(&self, incoming: &Order, candidates: &[Order]) -> NumericResult<MatchResults> {
        let mut matches = MatchResults::new();
        if !incoming.is_matchable() {
            return Ok(matches);
        }

        let mut eligible: Vec<&Order> = candidates
            .iter()
            .filter(|resting| self.is_candidate(incoming, resting))
            .collect();
        eligible.sort_by(|a, b| priority(incoming.side, a, b));

        let mut remaining = incoming.remaining_quantity();
        for resting in eligible {
            if remaining.is_zero() {
                break;
            }

            let quantity = remaining.min(resting.remaining_quantity());
            remaining = remaining.checked_sub(quantity)?;

            matches.push(MatchResult {
                incoming_order_id: incoming.id,
                resting_order_id: resting.id,
                resting_account_id: resting.account_id.clone(),
                price: resting.price,
                quantity,
            });
        }

        Ok(matches)
    }

    fn name(&self) -> &str {
        match self.self_trade {
            SelfTradePolicy::Allow => "PriceTime",
            SelfTradePolicy::SkipResting => "PriceTime-NoSelfTrade",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderDraft, TimeInForce};
    use crate::numeric::{Price, Quantity};
    use chrono::{TimeDelta, Utc};

    fn order(account: &str, side: Side, qty: i64, price: i64, offset_secs: i64, seq: u64) -> Order {
        Order::open(
            OrderDraft::new(
                account,
                "WIDGET",
                side,
                Quantity::from_integer(qty).unwrap(),
                Price::from_integer(price).unwrap(),
                TimeInForce::GoodTillCancel,
            ),
            false,
            None,
            Utc::now() + TimeDelta::seconds(offset_secs),
            seq,
        )
    }

    #[test]
    fn test_price_time_fifo_order() {
        let algo = PriceTimePriority::default();
        let sell1 = order("user1", Side::Sell, 1, 100, 0, 1);
        let sell2 = order("user2", Side::Sell, 1, 100, 1, 2);
        let buy = order("user3", Side::Buy, 1, 100, 2, 3);

        let matches = algo
            .match_order(&buy, &[sell2.clone(), sell1.clone()])
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].resting_order_id, sell1.id);
    }

    #[test]
    fn test_sequence_breaks_equal_timestamps() {
        let algo = PriceTimePriority::default();
        let first = order("user1", Side::Sell, 1, 100, 0, 7);
        let mut second = order("user2", Side::Sell, 1, 100, 0, 8);
        second.created_at = first.created_at;
        let buy = order("user3", Side::Buy, 1, 100, 1, 9);

        let matches = algo.match_order(&buy, &[second, first.clone()]).unwrap();
        assert_eq!(matches[0].resting_order_id, first.id);
    }

    #[test]
    fn test_best_price_first_and_price_improvement() {
        let algo = PriceTimePriority::default();
        let cheap = order("s1", Side::Sell, 2, 98, 5, 1);
        let dear = order("s2", Side::Sell, 2, 101, 0, 2);
        let too_dear = order("s3", Side::Sell, 2, 106, 0, 3);
        let buy = order("b", Side::Buy, 10, 105, 10, 4);

        let matches = algo
            .match_order(&buy, &[dear.clone(), too_dear, cheap.clone()])
            .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].resting_order_id, cheap.id);
        assert_eq!(matches[0].price, Price::from_integer(98).unwrap());
        assert_eq!(matches[1].resting_order_id, dear.id);
        assert_eq!(matches[1].price, Price::from_integer(101).unwrap());
    }

    #[test]
    fn test_sell_takes_highest_bid_first() {
        let algo = PriceTimePriority::default();
        let low = order("b1", Side::Buy, 1, 99, 0, 1);
        let high = order("b2", Side::Buy, 1, 102, 1, 2);
        let sell = order("s", Side::Sell, 1, 99, 2, 3);

        let matches = algo.match_order(&sell, &[low, high.clone()]).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].resting_order_id, high.id);
        assert_eq!(matches[0].price, Price::from_integer(102).unwrap());
    }

    #[test]
    fn test_price_time_partial_fill() {
        let algo = PriceTimePriority::default();
        let sell = order("user1", Side::Sell, 1, 100, 0, 1);
        let buy = order("user2", Side::Buy, 2, 100, 1, 2);

        let matches = algo.match_order(&buy, &[sell]).unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].quantity, Quantity::from_integer(1).unwrap());
        // planning does not touch the order itself
        assert_eq!(buy.remaining_quantity(), Quantity::from_integer(2).unwrap());
    }

    #[test]
    fn test_self_trade_policy() {
        let resting = order("alice", Side::Sell, 1, 100, 0, 1);
        let incoming = order("alice", Side::Buy, 1, 100, 1, 2);

        let allowed = PriceTimePriority::new(SelfTradePolicy::Allow)
            .match_order(&incoming, std::slice::from_ref(&resting))
            .unwrap();
        assert_eq!(allowed.len(), 1);

        let skipped = PriceTimePriority::new(SelfTradePolicy::SkipResting)
            .match_order(&incoming, &[resting])
            .unwrap();
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_no_candidates_is_noop() {
        let algo = PriceTimePriority::default();
        let buy = order("b", Side::Buy, 1, 100, 0, 1);
        assert!(algo.match_order(&buy, &[]).unwrap().is_empty());
    }
}
