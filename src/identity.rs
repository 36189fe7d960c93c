//! Actor identity and authorization
//!
//! Callers arrive pre-authenticated; this module only decides whether a
//! resolved `(actor, role, warehouse scope)` may perform a given action.
//! Permissions live in an explicit matrix rather than string-keyed maps so
//! every action/role pair is visible in one place.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Warehouse,
    DeliveryAgent,
    Customer,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "warehouse" => Some(Self::Warehouse),
            "delivery_agent" => Some(Self::DeliveryAgent),
            "customer" => Some(Self::Customer),
            _ => None,
        }
    }
}

/// Lifecycle actions subject to role checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    CreateOrder,
    ViewOrder,
    TransitionOrder,
    AssignDeliveryAgent,
    CancelOrder,
    GenerateDeliveryOtp,
    ConfirmDelivery,
    VerifyPayment,
    CreateReturn,
    ViewReturn,
    TransitionReturn,
    UpdatePickup,
    VerifyPickupOtp,
    ProcessRefund,
}

/// The permission matrix. Warehouse-scope and ownership/assignment checks are
/// separate predicates applied on top of this.
fn permitted(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;
    match role {
        Admin => true,
        Warehouse => matches!(
            action,
            CreateOrder
                | ViewOrder
                | TransitionOrder
                | AssignDeliveryAgent
                | CancelOrder
                | GenerateDeliveryOtp
                | ConfirmDelivery
                | VerifyPayment
                | ViewReturn
                | TransitionReturn
                | ProcessRefund
        ),
        DeliveryAgent => matches!(
            action,
            ViewOrder | GenerateDeliveryOtp | ConfirmDelivery | ViewReturn | UpdatePickup
                | VerifyPickupOtp
        ),
        Customer => matches!(
            action,
            CreateOrder | ViewOrder | CancelOrder | VerifyPayment | CreateReturn | ViewReturn
        ),
    }
}

/// Resolved caller identity, handed in by the (external) auth layer.
#[derive(Clone, Debug)]
pub struct ActorContext {
    pub actor_id: String,
    pub role: Role,
    pub warehouse_ids: Vec<String>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>, role: Role, warehouse_ids: Vec<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
            warehouse_ids,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins see every warehouse; warehouse actors only their assigned set.
    /// Other roles never pass the warehouse predicate and must be authorized
    /// through ownership or assignment instead.
    pub fn has_warehouse_scope(&self, warehouse_id: &str) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Warehouse => self.warehouse_ids.iter().any(|w| w == warehouse_id),
            _ => false,
        }
    }

    pub fn authorize(&self, action: Action) -> Result<(), ServiceError> {
        if permitted(self.role, action) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "role {:?} may not perform {:?}",
                self.role, action
            )))
        }
    }

    /// Role check plus warehouse scope for warehouse-bound mutations.
    pub fn authorize_scoped(&self, action: Action, warehouse_id: &str) -> Result<(), ServiceError> {
        self.authorize(action)?;
        match self.role {
            Role::Admin => Ok(()),
            Role::Warehouse if self.has_warehouse_scope(warehouse_id) => Ok(()),
            Role::Warehouse => Err(ServiceError::Forbidden(format!(
                "warehouse {} is outside the actor's scope",
                warehouse_id
            ))),
            // Agents and customers pass the role gate here and are checked
            // against assignment/ownership by the caller.
            _ => Ok(()),
        }
    }
}
