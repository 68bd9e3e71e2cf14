// ============================================================================
// Product Registry
// The slice of the product catalog the engine depends on
// ============================================================================

use crate::error::ValidationError;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::ProductId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Whether new orders may be submitted for this product
    pub tradeable: bool,
}

/// Registered products and their tradeable flag.
#[derive(Debug, Default)]
pub struct ProductRegistry {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl ProductRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a product as tradeable.
    pub fn register(&self, id: ProductId, name: impl Into<String>) -> Product {
        let product = Product {
            id: id.clone(),
            name: name.into(),
            tradeable: true,
        };
        self.products.write().insert(id, product.clone());
        product
    }

    /// Returns false when the product is unknown.
    pub fn set_tradeable(&self, id: &ProductId, tradeable: bool) -> bool {
        match self.products.write().get_mut(id) {
            Some(product) => {
                product.tradeable = tradeable;
                true
            },
            None => false,
        }
    }

    pub fn get(&self, id: &ProductId) -> Option<Product> {
        self.products.read().get(id).cloned()
    }

    pub fn ensure_tradeable(&self, id: &ProductId) -> Result<(), ValidationError> {
        match self.products.read().get(id) {
            None => Err(ValidationError::UnknownProduct(id.clone())),
            Some(product) if !product.tradeable => {
                Err(ValidationError::ProductNotTradeable(id.clone()))
            },
            Some(_) => Ok(()),
        }
    }
}
