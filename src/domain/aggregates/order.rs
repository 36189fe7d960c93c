//! Order Aggregate
//!
//! Owns the order status graph and the fields derived from it (payment
//! status, delivery date, cancellation block). The `status` field mirrors the
//! tail of `status_history`; both are only ever written together through
//! [`Order::record_status`], so the mirror cannot drift.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::value_objects::{new_order_reference, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Legal edges of the order graph. `Refunded -> Refunded` is allowed so a
    /// repeated refund request is idempotent rather than an error.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (New, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
                | (Shipped, Cancelled)
                | (Delivered, Refunded)
                | (Cancelled, Refunded)
                | (Refunded, Refunded)
        )
    }

    /// Statuses on which reserved stock has been handed back.
    pub fn releases_stock(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    pub fn is_cancellable(self) -> bool {
        !matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Online,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Prepaid,
    Paid,
    Refunded,
}

/// Payment status is a pure function of order status and method: terminal
/// cancellation/refund means refunded; a delivered COD order has collected
/// cash; otherwise COD is pending and online stays prepaid.
pub fn derive_payment_status(status: OrderStatus, method: PaymentMethod) -> PaymentStatus {
    match (status, method) {
        (OrderStatus::Cancelled | OrderStatus::Refunded, _) => PaymentStatus::Refunded,
        (OrderStatus::Delivered, PaymentMethod::Cod) => PaymentStatus::Paid,
        (_, PaymentMethod::Cod) => PaymentStatus::Pending,
        (_, PaymentMethod::Online) => PaymentStatus::Prepaid,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Immutable snapshot of an ordered line. Price, tax rate and warehouse are
/// frozen at checkout so later catalog edits cannot reshape past orders.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub tax_rate: Decimal,
    pub warehouse_id: String,
    pub returnable: bool,
    pub return_window_days: Option<u32>,
}

impl OrderItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    pub fn tax_amount(&self) -> Money {
        self.line_total().percent(self.tax_rate)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub subtotal: Money,
    pub tax: Money,
    pub discount: Money,
    pub delivery_charge: Money,
    pub cod_charge: Money,
    pub total: Money,
}

impl PricingBreakdown {
    /// Compute the breakdown from line snapshots. The grand total rounds up
    /// to a whole currency unit.
    pub fn compute(
        items: &[OrderItem],
        discount: Money,
        delivery_charge: Money,
        cod_charge: Money,
    ) -> Result<Self, OrderError> {
        let currency = discount.currency().to_string();
        let mut subtotal = Money::zero(&currency);
        let mut tax = Money::zero(&currency);
        for item in items {
            subtotal = subtotal.add(&item.line_total())?;
            tax = tax.add(&item.tax_amount())?;
        }
        let total = subtotal
            .add(&tax)?
            .add(&delivery_charge)?
            .add(&cod_charge)?
            .subtract(&discount)?
            .ceil();
        Ok(Self {
            subtotal,
            tax,
            discount,
            delivery_charge,
            cod_charge,
            total,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarehouseInfo {
    pub id: String,
    pub name: String,
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub agent_id: String,
    pub name: String,
    pub phone: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub reason: String,
    pub cancelled_by: String,
    pub cancelled_at: DateTime<Utc>,
    pub refund_reference: Option<String>,
}

/// Append-only audit entry. The `status` field is the string form of the
/// aggregate status at the time of the entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: String,
    pub actor_id: String,
    pub at: DateTime<Utc>,
    pub note: String,
}

impl StatusHistoryEntry {
    fn new(status: String, actor_id: &str, note: impl Into<String>) -> Self {
        Self {
            status,
            actor_id: actor_id.to_string(),
            at: Utc::now(),
            note: note.into(),
        }
    }
}

/// Metadata about an issued one-time code. The code itself never lands on the
/// aggregate; it lives in the OTP gate and travels to the customer over SMS.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtpIssuance {
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: String,
    customer: CustomerInfo,
    items: Vec<OrderItem>,
    pricing: PricingBreakdown,
    payment: PaymentInfo,
    warehouse: WarehouseInfo,
    delivery_address: String,
    delivery_agent: Option<AgentAssignment>,
    delivery_otp: Option<OtpIssuance>,
    tracking: Option<TrackingInfo>,
    status: OrderStatus,
    status_history: Vec<StatusHistoryEntry>,
    cancellation: Option<CancellationInfo>,
    actual_delivery_date: Option<DateTime<Utc>>,
    stock_reserved: bool,
    stock_released: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Order {
    pub fn create(
        customer: CustomerInfo,
        items: Vec<OrderItem>,
        pricing: PricingBreakdown,
        payment_method: PaymentMethod,
        warehouse: WarehouseInfo,
        delivery_address: String,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        let now = Utc::now();
        let status = OrderStatus::New;
        Ok(Self {
            id: new_order_reference(),
            payment: PaymentInfo {
                method: payment_method,
                status: derive_payment_status(status, payment_method),
                transaction_id: None,
            },
            customer,
            items,
            pricing,
            warehouse,
            delivery_address,
            delivery_agent: None,
            delivery_otp: None,
            tracking: None,
            status,
            status_history: vec![StatusHistoryEntry::new(
                status.to_string(),
                "system",
                "Order placed",
            )],
            cancellation: None,
            actual_delivery_date: None,
            stock_reserved: false,
            stock_released: false,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn customer(&self) -> &CustomerInfo {
        &self.customer
    }
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }
    pub fn pricing(&self) -> &PricingBreakdown {
        &self.pricing
    }
    pub fn payment(&self) -> &PaymentInfo {
        &self.payment
    }
    pub fn warehouse(&self) -> &WarehouseInfo {
        &self.warehouse
    }
    pub fn delivery_address(&self) -> &str {
        &self.delivery_address
    }
    pub fn delivery_agent(&self) -> Option<&AgentAssignment> {
        self.delivery_agent.as_ref()
    }
    pub fn delivery_otp(&self) -> Option<&OtpIssuance> {
        self.delivery_otp.as_ref()
    }
    pub fn tracking(&self) -> Option<&TrackingInfo> {
        self.tracking.as_ref()
    }
    pub fn status(&self) -> OrderStatus {
        self.status
    }
    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }
    pub fn cancellation(&self) -> Option<&CancellationInfo> {
        self.cancellation.as_ref()
    }
    pub fn actual_delivery_date(&self) -> Option<DateTime<Utc>> {
        self.actual_delivery_date
    }
    pub fn stock_reserved(&self) -> bool {
        self.stock_reserved
    }
    pub fn stock_released(&self) -> bool {
        self.stock_released
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn item(&self, item_id: &str) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// The single status mutator: validates the edge, appends the history
    /// entry, mirrors the status, re-derives payment status and stamps the
    /// delivery date on the first transition into `Delivered`.
    pub fn record_status(
        &mut self,
        next: OrderStatus,
        actor_id: &str,
        note: impl Into<String>,
    ) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status_history
            .push(StatusHistoryEntry::new(next.to_string(), actor_id, note));
        self.status = next;
        self.payment.status = derive_payment_status(next, self.payment.method);
        if next == OrderStatus::Delivered && self.actual_delivery_date.is_none() {
            self.actual_delivery_date = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Append an audit note without changing status (agent assignment,
    /// payment verification and similar non-transition events).
    pub fn record_note(&mut self, actor_id: &str, note: impl Into<String>) {
        self.status_history
            .push(StatusHistoryEntry::new(self.status.to_string(), actor_id, note));
        self.touch();
    }

    pub fn assign_agent(&mut self, assignment: AgentAssignment) -> Result<(), OrderError> {
        if !matches!(self.status, OrderStatus::Processing | OrderStatus::Shipped) {
            return Err(OrderError::NotAssignable(self.status));
        }
        let note = format!("Delivery agent {} assigned", assignment.agent_id);
        let actor = assignment.assigned_by.clone();
        self.delivery_agent = Some(assignment);
        self.record_note(&actor, note);
        Ok(())
    }

    pub fn set_tracking(&mut self, tracking: TrackingInfo) {
        self.tracking = Some(tracking);
        self.touch();
    }

    pub fn set_transaction_id(&mut self, transaction_id: impl Into<String>) {
        self.payment.transaction_id = Some(transaction_id.into());
        self.touch();
    }

    pub fn set_delivery_otp(&mut self, issuance: OtpIssuance) {
        self.delivery_otp = Some(issuance);
        self.touch();
    }

    pub fn mark_delivery_otp_verified(&mut self) {
        if let Some(otp) = self.delivery_otp.as_mut() {
            otp.verified_at = Some(Utc::now());
            self.touch();
        }
    }

    pub fn set_cancellation(&mut self, cancellation: CancellationInfo) {
        self.cancellation = Some(cancellation);
        self.touch();
    }

    pub fn set_refund_reference(&mut self, refund_ref: impl Into<String>) {
        let refund_ref = refund_ref.into();
        match self.cancellation.as_mut() {
            Some(c) => c.refund_reference = Some(refund_ref),
            None => {
                self.cancellation = Some(CancellationInfo {
                    reason: "refund".to_string(),
                    cancelled_by: "system".to_string(),
                    cancelled_at: Utc::now(),
                    refund_reference: Some(refund_ref),
                });
            }
        }
        self.touch();
    }

    pub fn mark_stock_reserved(&mut self) {
        self.stock_reserved = true;
        self.touch();
    }

    pub fn mark_stock_released(&mut self) {
        self.stock_released = true;
        self.touch();
    }

    /// Stores bump this on every successful compare-and-swap write.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("agent cannot be assigned while order is {0}")]
    NotAssignable(OrderStatus),
    #[error(transparent)]
    Money(#[from] crate::domain::value_objects::MoneyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: i64, qty: u32) -> OrderItem {
        OrderItem {
            id: format!("item-{}-{}", price, qty),
            product_id: "P1".into(),
            variant_id: None,
            name: "Widget".into(),
            unit_price: Money::inr(Decimal::new(price, 0)),
            quantity: qty,
            tax_rate: Decimal::ZERO,
            warehouse_id: "WH-1".into(),
            returnable: true,
            return_window_days: Some(7),
        }
    }

    fn order(method: PaymentMethod) -> Order {
        let items = vec![item(100, 2), item(50, 1)];
        let pricing = PricingBreakdown::compute(
            &items,
            Money::inr(Decimal::ZERO),
            Money::inr(Decimal::ZERO),
            Money::inr(Decimal::ZERO),
        )
        .unwrap();
        Order::create(
            CustomerInfo {
                id: "cust-1".into(),
                name: "Asha".into(),
                email: "asha@example.com".into(),
                phone: "+911234567890".into(),
            },
            items,
            pricing,
            method,
            WarehouseInfo {
                id: "WH-1".into(),
                name: "Central".into(),
                address: "1 Depot Rd".into(),
            },
            "22 Lake View".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_starts_new_with_placed_entry() {
        let o = order(PaymentMethod::Cod);
        assert_eq!(o.status(), OrderStatus::New);
        assert_eq!(o.status_history().len(), 1);
        assert_eq!(o.status_history()[0].note, "Order placed");
        assert_eq!(o.payment().status, PaymentStatus::Pending);
        assert!(o.id().starts_with("ORD-"));
    }

    #[test]
    fn test_online_order_starts_prepaid() {
        let o = order(PaymentMethod::Online);
        assert_eq!(o.payment().status, PaymentStatus::Prepaid);
    }

    #[test]
    fn test_total_is_rounded_up() {
        let items = vec![OrderItem {
            tax_rate: Decimal::new(18, 0),
            ..item(199, 1)
        }];
        let pricing = PricingBreakdown::compute(
            &items,
            Money::inr(Decimal::ZERO),
            Money::inr(Decimal::new(30, 0)),
            Money::inr(Decimal::ZERO),
        )
        .unwrap();
        // 199 + 35.82 + 30 = 264.82 -> 265
        assert_eq!(pricing.total.amount(), Decimal::new(265, 0));
    }

    #[test]
    fn test_legal_path_derives_payment() {
        let mut o = order(PaymentMethod::Cod);
        o.record_status(OrderStatus::Processing, "wh-1", "picked").unwrap();
        o.record_status(OrderStatus::Shipped, "wh-1", "shipped").unwrap();
        assert_eq!(o.payment().status, PaymentStatus::Pending);
        o.record_status(OrderStatus::Delivered, "agent-1", "delivered").unwrap();
        assert_eq!(o.payment().status, PaymentStatus::Paid);
        assert!(o.actual_delivery_date().is_some());
        assert_eq!(o.status_history().len(), 4);
    }

    #[test]
    fn test_illegal_edges_rejected_without_mutation() {
        let mut o = order(PaymentMethod::Cod);
        let err = o.record_status(OrderStatus::Delivered, "x", "skip").unwrap_err();
        assert!(matches!(err, OrderError::IllegalTransition { .. }));
        assert_eq!(o.status(), OrderStatus::New);
        assert_eq!(o.status_history().len(), 1);

        o.record_status(OrderStatus::Cancelled, "x", "cancel").unwrap();
        assert!(o
            .record_status(OrderStatus::Processing, "x", "reopen")
            .is_err());
        // cancelled -> refunded is the only exit
        o.record_status(OrderStatus::Refunded, "x", "refund").unwrap();
        assert_eq!(o.payment().status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_status_mirrors_history_tail() {
        let mut o = order(PaymentMethod::Cod);
        o.record_status(OrderStatus::Processing, "wh-1", "").unwrap();
        let tail = o.status_history().last().unwrap();
        assert_eq!(tail.status, o.status().to_string());
    }

    #[test]
    fn test_agent_assignment_window() {
        let mut o = order(PaymentMethod::Cod);
        let assignment = AgentAssignment {
            agent_id: "agent-1".into(),
            name: "Ravi".into(),
            phone: "+919999999999".into(),
            assigned_by: "wh-1".into(),
            assigned_at: Utc::now(),
        };
        assert!(o.assign_agent(assignment.clone()).is_err());
        o.record_status(OrderStatus::Processing, "wh-1", "").unwrap();
        o.assign_agent(assignment).unwrap();
        assert_eq!(o.status(), OrderStatus::Processing);
        assert_eq!(o.delivery_agent().unwrap().agent_id, "agent-1");
    }
}
