//! Inventory ledger
//!
//! The only writer of stock counters on behalf of the order and return
//! flows. Each line adjusts through a read-modify-CAS loop against the
//! product store; a lost race retries, a domain failure (missing product,
//! insufficient stock) is reported per line. Callers own release idempotence
//! by gating on the aggregate's previous status.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::domain::aggregates::{OrderItem, ReturnItem};
use crate::store::ProductStore;
use crate::error::ServiceError;

const CAS_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, Serialize)]
pub struct StockLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
}

impl From<&OrderItem> for StockLine {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            variant_id: item.variant_id.clone(),
            quantity: item.quantity,
        }
    }
}

impl From<&ReturnItem> for StockLine {
    fn from(item: &ReturnItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            variant_id: item.variant_id.clone(),
            quantity: item.quantity,
        }
    }
}

/// Per-line result of a reserve/release pass.
#[derive(Clone, Debug, Serialize)]
pub struct LineOutcome {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AdjustmentReport {
    pub outcomes: Vec<LineOutcome>,
}

impl AdjustmentReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &LineOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    /// Short description of the failed lines for response warnings.
    pub fn failure_summary(&self) -> Option<String> {
        let failed: Vec<String> = self
            .failures()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.product_id,
                    o.error.as_deref().unwrap_or("unknown")
                )
            })
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(failed.join("; "))
        }
    }
}

#[derive(Clone)]
pub struct InventoryLedger {
    products: Arc<dyn ProductStore>,
}

impl InventoryLedger {
    pub fn new(products: Arc<dyn ProductStore>) -> Self {
        Self { products }
    }

    /// Decrement stock for every line. Called once per order: at creation for
    /// COD, at payment verification for online.
    pub async fn reserve(&self, lines: &[StockLine]) -> AdjustmentReport {
        self.adjust(lines, -1).await
    }

    /// Increment stock for every line, on cancellation/refund or a fully
    /// refunded return.
    pub async fn release(&self, lines: &[StockLine]) -> AdjustmentReport {
        self.adjust(lines, 1).await
    }

    async fn adjust(&self, lines: &[StockLine], sign: i64) -> AdjustmentReport {
        let mut report = AdjustmentReport::default();
        for line in lines {
            let error = self.adjust_line(line, sign * line.quantity as i64).await;
            if let Some(reason) = &error {
                warn!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    sign,
                    reason = %reason,
                    "stock adjustment failed"
                );
            }
            report.outcomes.push(LineOutcome {
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                quantity: line.quantity,
                error,
            });
        }
        report
    }

    async fn adjust_line(&self, line: &StockLine, delta: i64) -> Option<String> {
        for _ in 0..CAS_ATTEMPTS {
            let product = match self.products.get_product(&line.product_id).await {
                Ok(Some(p)) => p,
                Ok(None) => return Some("product not found".to_string()),
                Err(e) => return Some(e.to_string()),
            };
            let mut product = product;
            if let Err(e) = product.adjust_stock(line.variant_id.as_deref(), delta) {
                return Some(e.to_string());
            }
            match self.products.update_product(product).await {
                Ok(_) => return None,
                Err(ServiceError::Conflict { .. }) => continue,
                Err(e) => return Some(e.to_string()),
            }
        }
        Some("too many concurrent stock writers".to_string())
    }
}
