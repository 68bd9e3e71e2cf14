// ============================================================================
// Concurrency Helpers
// Per-product critical sections and conflict retry
// ============================================================================

use crate::domain::ProductId;
use crate::error::{EngineError, EngineResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// One mutex per product. Matching on a product is serialized; different
/// products proceed in parallel.
#[derive(Default)]
pub struct ProductLocks {
    locks: RwLock<HashMap<ProductId, Arc<Mutex<()>>>>,
}

impl ProductLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a product, created on first use.
    pub fn handle(&self, product_id: &ProductId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(product_id) {
            return Arc::clone(lock);
        }
        Arc::clone(self.locks.write().entry(product_id.clone()).or_default())
    }
}

/// Run `op`, rerunning it up to `retries` times when it fails with a
/// concurrency conflict. Other errors are returned as they are.
pub fn retry_on_conflict<T>(
    retries: u32,
    mut op: impl FnMut() -> EngineResult<T>,
) -> EngineResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(err @ EngineError::ConcurrencyConflict { .. }) if attempt < retries => {
                attempt += 1;
                tracing::debug!(%err, attempt, "concurrency conflict, recomputing");
            },
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderId;

    #[test]
    fn test_same_product_shares_lock() {
        let locks = ProductLocks::new();
        let a = locks.handle(&ProductId::from("WIDGET"));
        let b = locks.handle(&ProductId::from("WIDGET"));
        let c = locks.handle(&ProductId::from("GADGET"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let _guard = a.lock();
        assert!(b.try_lock().is_none());
        assert!(c.try_lock().is_some());
    }

    #[test]
    fn test_conflict_retried_once() {
        let conflict = || EngineError::ConcurrencyConflict {
            order_id: OrderId::new(),
            expected: 1,
            found: 2,
        };

        let mut calls = 0;
        let result = retry_on_conflict(1, || {
            calls += 1;
            if calls == 1 {
                Err(conflict())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(2));

        let mut calls = 0;
        let result: EngineResult<()> = retry_on_conflict(1, || {
            calls += 1;
            Err(conflict())
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_other_errors_not_retried() {
        let mut calls = 0;
        let result: EngineResult<()> = retry_on_conflict(3, || {
            calls += 1;
            Err(EngineError::OrderNotFound(OrderId::new()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
