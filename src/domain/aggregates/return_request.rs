//! Return Aggregate
//!
//! A return references exactly one delivered order. Line items carry their
//! own status so refunds can land item by item; the aggregate status is a
//! rollup (`Refunded` only when every item is, `PartiallyRefunded` in
//! between). As with orders, `status` mirrors the history tail and both move
//! only through [`Return::record_status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::aggregates::order::{AgentAssignment, OtpIssuance, StatusHistoryEntry};
use crate::domain::value_objects::{new_return_reference, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    Approved,
    PickupAssigned,
    PickupRejected,
    PickedUp,
    Received,
    PartiallyRefunded,
    Refunded,
    Rejected,
}

impl ReturnStatus {
    /// Aggregate edges. `PickupRejected` loops back to `PickupAssigned` so a
    /// rejected pickup can be handed to another agent.
    pub fn can_transition_to(self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, next),
            (Requested, Approved)
                | (Requested, Rejected)
                | (Approved, PickupAssigned)
                | (Approved, Rejected)
                | (PickupAssigned, PickupRejected)
                | (PickupAssigned, PickedUp)
                | (PickupRejected, PickupAssigned)
                | (PickedUp, Received)
                | (Received, PartiallyRefunded)
                | (Received, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReturnStatus::Refunded | ReturnStatus::Rejected)
    }

    /// Refunds may be applied once the goods are back at the warehouse.
    pub fn accepts_refunds(self) -> bool {
        matches!(self, ReturnStatus::Received | ReturnStatus::PartiallyRefunded)
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::PickupAssigned => "pickup_assigned",
            Self::PickupRejected => "pickup_rejected",
            Self::PickedUp => "picked_up",
            Self::Received => "received",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// Per-item status: the aggregate graph minus the rollup-only
/// `PartiallyRefunded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemReturnStatus {
    Requested,
    Approved,
    PickupAssigned,
    PickupRejected,
    PickedUp,
    Received,
    Refunded,
    Rejected,
}

impl ItemReturnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemReturnStatus::Refunded | ItemReturnStatus::Rejected)
    }

    /// Item statuses travel with the aggregate through the pickup pipeline;
    /// refund and rejection stamp items individually.
    fn mirror_of(aggregate: ReturnStatus) -> Option<Self> {
        match aggregate {
            ReturnStatus::Requested => Some(Self::Requested),
            ReturnStatus::Approved => Some(Self::Approved),
            ReturnStatus::PickupAssigned => Some(Self::PickupAssigned),
            ReturnStatus::PickupRejected => Some(Self::PickupRejected),
            ReturnStatus::PickedUp => Some(Self::PickedUp),
            ReturnStatus::Received => Some(Self::Received),
            ReturnStatus::Rejected => Some(Self::Rejected),
            ReturnStatus::PartiallyRefunded | ReturnStatus::Refunded => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReturnItem {
    pub id: String,
    /// Back-reference to the originating order line.
    pub order_item_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub status: ItemReturnStatus,
    pub refund_amount: Option<Money>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PickupInfo {
    pub address: String,
    pub instructions: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundInfo {
    pub method: Option<RefundMethod>,
    pub status: String,
    pub total: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    /// Reversal through the payment gateway of the original transaction.
    Gateway,
    /// Settled outside the system (cash, bank transfer).
    Manual,
    StoreCredit,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Return {
    id: String,
    order_id: String,
    customer_id: String,
    customer_phone: String,
    items: Vec<ReturnItem>,
    reason: String,
    pickup: PickupInfo,
    pickup_agent: Option<AgentAssignment>,
    pickup_otp: Option<OtpIssuance>,
    picked_up_at: Option<DateTime<Utc>>,
    refund: RefundInfo,
    refunded_amount: Money,
    status: ReturnStatus,
    status_history: Vec<StatusHistoryEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Return {
    pub fn create(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        customer_phone: impl Into<String>,
        items: Vec<ReturnItem>,
        reason: impl Into<String>,
        pickup: PickupInfo,
        currency: &str,
    ) -> Result<Self, ReturnError> {
        if items.is_empty() {
            return Err(ReturnError::NoItems);
        }
        let now = Utc::now();
        let status = ReturnStatus::Requested;
        Ok(Self {
            id: new_return_reference(),
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            customer_phone: customer_phone.into(),
            items,
            reason: reason.into(),
            pickup,
            pickup_agent: None,
            pickup_otp: None,
            picked_up_at: None,
            refund: RefundInfo {
                method: None,
                status: "none".to_string(),
                total: Money::zero(currency),
            },
            refunded_amount: Money::zero(currency),
            status,
            status_history: vec![StatusHistoryEntry {
                status: status.to_string(),
                actor_id: "system".to_string(),
                at: now,
                note: "Return requested".to_string(),
            }],
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn order_id(&self) -> &str {
        &self.order_id
    }
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }
    pub fn customer_phone(&self) -> &str {
        &self.customer_phone
    }
    pub fn items(&self) -> &[ReturnItem] {
        &self.items
    }
    pub fn reason(&self) -> &str {
        &self.reason
    }
    pub fn pickup(&self) -> &PickupInfo {
        &self.pickup
    }
    pub fn pickup_agent(&self) -> Option<&AgentAssignment> {
        self.pickup_agent.as_ref()
    }
    pub fn pickup_otp(&self) -> Option<&OtpIssuance> {
        self.pickup_otp.as_ref()
    }
    pub fn picked_up_at(&self) -> Option<DateTime<Utc>> {
        self.picked_up_at
    }
    pub fn refund(&self) -> &RefundInfo {
        &self.refund
    }
    pub fn refunded_amount(&self) -> &Money {
        &self.refunded_amount
    }
    pub fn status(&self) -> ReturnStatus {
        self.status
    }
    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn item(&self, item_id: &str) -> Option<&ReturnItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// The single status mutator. Pipeline statuses are mirrored onto every
    /// line item that has not already reached a terminal status of its own.
    pub fn record_status(
        &mut self,
        next: ReturnStatus,
        actor_id: &str,
        note: impl Into<String>,
    ) -> Result<(), ReturnError> {
        if !self.status.can_transition_to(next) {
            return Err(ReturnError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status_history.push(StatusHistoryEntry {
            status: next.to_string(),
            actor_id: actor_id.to_string(),
            at: Utc::now(),
            note: note.into(),
        });
        self.status = next;
        if let Some(item_status) = ItemReturnStatus::mirror_of(next) {
            for item in self.items.iter_mut().filter(|i| !i.status.is_terminal()) {
                item.status = item_status;
            }
        }
        self.touch();
        Ok(())
    }

    pub fn record_note(&mut self, actor_id: &str, note: impl Into<String>) {
        self.status_history.push(StatusHistoryEntry {
            status: self.status.to_string(),
            actor_id: actor_id.to_string(),
            at: Utc::now(),
            note: note.into(),
        });
        self.touch();
    }

    pub fn set_pickup_agent(&mut self, assignment: AgentAssignment) {
        self.pickup_agent = Some(assignment);
        self.touch();
    }

    pub fn clear_pickup_agent(&mut self) {
        self.pickup_agent = None;
        self.touch();
    }

    pub fn set_pickup_otp(&mut self, issuance: OtpIssuance) {
        self.pickup_otp = Some(issuance);
        self.touch();
    }

    pub fn mark_pickup_otp_verified(&mut self) -> Result<(), ReturnError> {
        match self.pickup_otp.as_mut() {
            Some(otp) => {
                otp.verified_at = Some(Utc::now());
                self.touch();
                Ok(())
            }
            None => Err(ReturnError::NoPickupOtp),
        }
    }

    pub fn pickup_otp_verified(&self) -> bool {
        self.pickup_otp
            .as_ref()
            .map(|o| o.verified_at.is_some())
            .unwrap_or(false)
    }

    pub fn mark_picked_up(&mut self) {
        self.picked_up_at = Some(Utc::now());
        self.touch();
    }

    /// Apply per-item refunds and recompute the aggregate rollup. Validation
    /// happens before any mutation so a bad entry leaves the aggregate
    /// untouched. Returns the refunded total of this application.
    pub fn apply_refunds(
        &mut self,
        refunds: &[(String, Money)],
        method: RefundMethod,
        actor_id: &str,
    ) -> Result<Money, ReturnError> {
        if !self.status.accepts_refunds() {
            return Err(ReturnError::NotRefundable(self.status));
        }
        if refunds.is_empty() {
            return Err(ReturnError::NoItems);
        }
        for (item_id, amount) in refunds {
            let item = self
                .items
                .iter()
                .find(|i| &i.id == item_id)
                .ok_or_else(|| ReturnError::UnknownItem(item_id.clone()))?;
            if item.status == ItemReturnStatus::Refunded {
                return Err(ReturnError::AlreadyRefunded(item_id.clone()));
            }
            if !amount.is_positive() {
                return Err(ReturnError::NonPositiveRefund(item_id.clone()));
            }
        }

        let now = Utc::now();
        let mut applied = Money::zero(self.refunded_amount.currency());
        for (item_id, amount) in refunds {
            let item = self
                .items
                .iter_mut()
                .find(|i| &i.id == item_id)
                .ok_or_else(|| ReturnError::UnknownItem(item_id.clone()))?;
            item.status = ItemReturnStatus::Refunded;
            item.refund_amount = Some(amount.clone());
            item.refunded_at = Some(now);
            applied = applied.add(amount)?;
        }
        self.refunded_amount = self.refunded_amount.add(&applied)?;
        self.refund.method = Some(method);
        self.refund.status = "processed".to_string();
        self.refund.total = self.refunded_amount.clone();

        let next = if self.all_items_refunded() {
            ReturnStatus::Refunded
        } else {
            ReturnStatus::PartiallyRefunded
        };
        self.record_status(
            next,
            actor_id,
            format!(
                "Refunded {} across {} item(s) via {:?}",
                applied,
                refunds.len(),
                method
            ),
        )?;
        Ok(applied)
    }

    pub fn all_items_refunded(&self) -> bool {
        self.items
            .iter()
            .all(|i| i.status == ItemReturnStatus::Refunded)
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Error)]
pub enum ReturnError {
    #[error("return has no items")]
    NoItems,
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: ReturnStatus,
        to: ReturnStatus,
    },
    #[error("refunds cannot be applied while return is {0}")]
    NotRefundable(ReturnStatus),
    #[error("item {0} does not belong to this return")]
    UnknownItem(String),
    #[error("item {0} is already refunded")]
    AlreadyRefunded(String),
    #[error("refund amount for item {0} must be positive")]
    NonPositiveRefund(String),
    #[error("no pickup code has been issued")]
    NoPickupOtp,
    #[error(transparent)]
    Money(#[from] crate::domain::value_objects::MoneyError),
}
