//! Domain events
//!
//! Emitted after successful aggregate writes and published best-effort. The
//! serialized form is the NATS payload, so variants are tagged.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Return(ReturnEvent),
    Inventory(InventoryEvent),
}

impl DomainEvent {
    /// NATS subject suffix, e.g. `order.status_changed`.
    pub fn subject(&self) -> String {
        match self {
            Self::Order(e) => format!("order.{}", e.name()),
            Self::Return(e) => format!("return.{}", e.name()),
            Self::Inventory(e) => format!("inventory.{}", e.name()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_id: String,
        total: Decimal,
    },
    PaymentVerified {
        order_id: String,
        transaction_id: String,
    },
    StatusChanged {
        order_id: String,
        from: String,
        to: String,
    },
    AgentAssigned {
        order_id: String,
        agent_id: String,
    },
    Cancelled {
        order_id: String,
        reason: String,
    },
}

impl OrderEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::PaymentVerified { .. } => "payment_verified",
            Self::StatusChanged { .. } => "status_changed",
            Self::AgentAssigned { .. } => "agent_assigned",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReturnEvent {
    Requested {
        return_id: String,
        order_id: String,
        item_count: usize,
    },
    StatusChanged {
        return_id: String,
        from: String,
        to: String,
    },
    PickupAssigned {
        return_id: String,
        agent_id: String,
    },
    Refunded {
        return_id: String,
        amount: Decimal,
        partial: bool,
    },
}

impl ReturnEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Requested { .. } => "requested",
            Self::StatusChanged { .. } => "status_changed",
            Self::PickupAssigned { .. } => "pickup_assigned",
            Self::Refunded { .. } => "refunded",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    Reserved {
        product_id: String,
        quantity: u32,
    },
    Released {
        product_id: String,
        quantity: u32,
    },
    ReservationFailed {
        product_id: String,
        quantity: u32,
        reason: String,
    },
}

impl InventoryEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Reserved { .. } => "reserved",
            Self::Released { .. } => "released",
            Self::ReservationFailed { .. } => "reservation_failed",
        }
    }
}
