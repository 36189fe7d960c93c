//! Payment gateway bridge
//!
//! The gateway protocol is a collaborator: the lifecycle services only need
//! signature verification, payment lookup and refunds. The real client is
//! wired in by the host deployment; without one, every call fails loudly
//! rather than pretending money moved.

use async_trait::async_trait;

use crate::domain::value_objects::Money;
use crate::error::{Result, ServiceError};

#[derive(Clone, Debug)]
pub struct PaymentRecord {
    pub status: String,
    pub method: String,
    pub amount: Money,
}

#[derive(Clone, Debug)]
pub struct RefundReceipt {
    pub refund_ref: String,
    pub amount: Money,
}

#[async_trait]
pub trait PaymentBridge: Send + Sync {
    /// Verify the gateway's signature over (order ref, payment ref).
    async fn verify_signature(
        &self,
        order_ref: &str,
        payment_ref: &str,
        signature: &str,
    ) -> Result<bool>;

    async fn fetch_payment(&self, payment_ref: &str) -> Result<PaymentRecord>;

    /// Reverse funds. `amount = None` refunds the full payment.
    async fn refund(&self, payment_ref: &str, amount: Option<Money>) -> Result<RefundReceipt>;
}

/// Default bridge for deployments without a configured gateway.
pub struct UnconfiguredPaymentBridge;

#[async_trait]
impl PaymentBridge for UnconfiguredPaymentBridge {
    async fn verify_signature(&self, _: &str, _: &str, _: &str) -> Result<bool> {
        Err(not_configured())
    }

    async fn fetch_payment(&self, _: &str) -> Result<PaymentRecord> {
        Err(not_configured())
    }

    async fn refund(&self, _: &str, _: Option<Money>) -> Result<RefundReceipt> {
        Err(not_configured())
    }
}

fn not_configured() -> ServiceError {
    ServiceError::Payment("payment gateway not configured".to_string())
}
