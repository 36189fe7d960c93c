//! Product Aggregate (inventory view)
//!
//! Catalog management lives elsewhere; the lifecycle engine only needs the
//! stock counters, the returnable flag and the return window. Stock moves
//! exclusively through the inventory ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    id: String,
    name: String,
    stock: i64,
    variants: Vec<VariantStock>,
    returnable: bool,
    return_window_days: Option<u32>,
    updated_at: DateTime<Utc>,
    version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariantStock {
    pub id: String,
    pub stock: i64,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>, stock: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stock,
            variants: vec![],
            returnable: true,
            return_window_days: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    pub fn with_variant(mut self, variant_id: impl Into<String>, stock: i64) -> Self {
        self.variants.push(VariantStock {
            id: variant_id.into(),
            stock,
        });
        self
    }

    pub fn with_return_policy(mut self, returnable: bool, window_days: Option<u32>) -> Self {
        self.returnable = returnable;
        self.return_window_days = window_days;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn stock(&self) -> i64 {
        self.stock
    }
    pub fn variants(&self) -> &[VariantStock] {
        &self.variants
    }
    pub fn returnable(&self) -> bool {
        self.returnable
    }
    pub fn return_window_days(&self) -> Option<u32> {
        self.return_window_days
    }
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn variant_stock(&self, variant_id: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|v| v.id == variant_id)
            .map(|v| v.stock)
    }

    /// Adjust the product-level counter, or a variant's when `variant_id` is
    /// given. A decrement past zero fails without mutating.
    pub fn adjust_stock(
        &mut self,
        variant_id: Option<&str>,
        delta: i64,
    ) -> Result<(), ProductError> {
        let counter = match variant_id {
            None => &mut self.stock,
            Some(vid) => {
                &mut self
                    .variants
                    .iter_mut()
                    .find(|v| v.id == vid)
                    .ok_or_else(|| ProductError::UnknownVariant(vid.to_string()))?
                    .stock
            }
        };
        let next = *counter + delta;
        if next < 0 {
            return Err(ProductError::InsufficientStock {
                product_id: self.id.clone(),
                requested: -delta,
                available: *counter,
            });
        }
        *counter = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProductError {
    #[error("unknown variant {0}")]
    UnknownVariant(String),
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_product_stock() {
        let mut p = Product::new("P1", "Widget", 10);
        p.adjust_stock(None, -3).unwrap();
        assert_eq!(p.stock(), 7);
        p.adjust_stock(None, 3).unwrap();
        assert_eq!(p.stock(), 10);
    }

    #[test]
    fn test_decrement_past_zero_fails() {
        let mut p = Product::new("P1", "Widget", 2);
        let err = p.adjust_stock(None, -5).unwrap_err();
        assert!(matches!(err, ProductError::InsufficientStock { .. }));
        assert_eq!(p.stock(), 2);
    }

    #[test]
    fn test_variant_stock() {
        let mut p = Product::new("P1", "Widget", 0).with_variant("V1", 4);
        p.adjust_stock(Some("V1"), -4).unwrap();
        assert_eq!(p.variant_stock("V1"), Some(0));
        assert!(p.adjust_stock(Some("V2"), -1).is_err());
    }
}
