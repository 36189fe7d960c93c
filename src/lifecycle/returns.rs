//! Return lifecycle service
//!
//! Drives a return from request through pickup to refund. Refunds are
//! applied per line item; the aggregate status is a rollup and the running
//! `refunded_amount` always equals the sum over refunded items. Collection
//! is gated on the pickup code having been verified.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::domain::aggregates::{
    AgentAssignment, ItemReturnStatus, OrderStatus, OtpIssuance, PaymentMethod, PickupInfo,
    RefundMethod, Return, ReturnItem, ReturnStatus,
};
use crate::domain::events::{DomainEvent, ReturnEvent};
use crate::domain::value_objects::Money;
use crate::error::{Result, ServiceError};
use crate::identity::{Action, ActorContext, Role};
use crate::inventory::{InventoryLedger, StockLine};
use crate::notify::Notifier;
use crate::otp::{OtpGate, OtpKeying};
use crate::payment::PaymentBridge;
use crate::publisher::EventPublisher;
use crate::store::{OrderStore, ProductStore, ReturnFilter, ReturnStore};

use super::order::AgentDetails;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReturnRequest {
    pub order_id: String,
    #[validate(length(min = 1, message = "a return must name at least one item"))]
    pub items: Vec<ReturnItemRequest>,
    #[validate(length(min = 1, message = "a reason is required"))]
    pub reason: String,
    pub pickup_address: String,
    #[serde(default)]
    pub pickup_instructions: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReturnItemRequest {
    /// Id of the originating order line.
    pub order_item_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReturnTransitionRequest {
    pub status: ReturnStatus,
    #[serde(default)]
    pub note: Option<String>,
    /// Required when `status` is `pickup_assigned`.
    #[serde(default)]
    pub agent: Option<AgentDetails>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PickupAction {
    Reject,
    Collect,
}

#[derive(Debug, Deserialize)]
pub struct ProcessRefundRequest {
    pub refunds: Vec<ItemRefundRequest>,
    pub method: RefundMethod,
}

#[derive(Debug, Deserialize)]
pub struct ItemRefundRequest {
    pub item_id: String,
    pub refund_amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ReturnOutcome {
    pub ret: Return,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundOutcome {
    pub ret: Return,
    pub refund_reference: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct ReturnLifecycle {
    returns: Arc<dyn ReturnStore>,
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    ledger: InventoryLedger,
    otp: Arc<OtpGate>,
    payments: Arc<dyn PaymentBridge>,
    notifier: Arc<dyn Notifier>,
    publisher: Arc<EventPublisher>,
    config: AppConfig,
}

impl ReturnLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        returns: Arc<dyn ReturnStore>,
        orders: Arc<dyn OrderStore>,
        products: Arc<dyn ProductStore>,
        ledger: InventoryLedger,
        otp: Arc<OtpGate>,
        payments: Arc<dyn PaymentBridge>,
        notifier: Arc<dyn Notifier>,
        publisher: Arc<EventPublisher>,
        config: AppConfig,
    ) -> Self {
        Self {
            returns,
            orders,
            products,
            ledger,
            otp,
            payments,
            notifier,
            publisher,
            config,
        }
    }

    /// Open a return against a delivered order, item by item, enforcing the
    /// returnable flag and the per-item return window.
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn create_return_request(
        &self,
        request: CreateReturnRequest,
        actor: &ActorContext,
    ) -> Result<ReturnOutcome> {
        actor.authorize(Action::CreateReturn)?;
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let order = self
            .orders
            .get_order(&request.order_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", &request.order_id))?;
        if actor.role == Role::Customer && order.customer().id != actor.actor_id {
            return Err(ServiceError::Forbidden(
                "order belongs to a different customer".to_string(),
            ));
        }
        if order.status() != OrderStatus::Delivered {
            return Err(ServiceError::InvalidState(
                "returns can only be opened against delivered orders".to_string(),
            ));
        }
        let delivered_at = order.actual_delivery_date().ok_or_else(|| {
            ServiceError::InvalidState("order has no recorded delivery date".to_string())
        })?;
        let days_since_delivery = (Utc::now() - delivered_at).num_days();

        let mut items = Vec::with_capacity(request.items.len());
        let mut seen = std::collections::HashSet::new();
        for line in &request.items {
            if !seen.insert(line.order_item_id.clone()) {
                return Err(ServiceError::Validation(format!(
                    "item {} is listed twice",
                    line.order_item_id
                )));
            }
            let order_item = order.item(&line.order_item_id).ok_or_else(|| {
                ServiceError::Validation(format!(
                    "item {} is not part of order {}",
                    line.order_item_id,
                    order.id()
                ))
            })?;
            if line.quantity == 0 || line.quantity > order_item.quantity {
                return Err(ServiceError::Validation(format!(
                    "quantity for item {} must be between 1 and {}",
                    line.order_item_id, order_item.quantity
                )));
            }
            if !order_item.returnable {
                return Err(ServiceError::NotReturnable(line.order_item_id.clone()));
            }
            let window_days = self.return_window_for(order_item).await?;
            if days_since_delivery > i64::from(window_days) {
                return Err(ServiceError::ReturnWindowExpired {
                    item_id: line.order_item_id.clone(),
                    days_since_delivery,
                    window_days,
                });
            }
            items.push(ReturnItem {
                id: Uuid::new_v4().to_string(),
                order_item_id: order_item.id.clone(),
                product_id: order_item.product_id.clone(),
                variant_id: order_item.variant_id.clone(),
                name: order_item.name.clone(),
                unit_price: order_item.unit_price.clone(),
                quantity: line.quantity,
                status: ItemReturnStatus::Requested,
                refund_amount: None,
                refunded_at: None,
            });
        }

        let item_count = items.len();
        let ret = Return::create(
            order.id(),
            order.customer().id.clone(),
            order.customer().phone.clone(),
            items,
            request.reason,
            PickupInfo {
                address: request.pickup_address,
                instructions: request.pickup_instructions,
            },
            order.pricing().total.currency(),
        )?;
        let ret = self.returns.insert_return(ret).await?;
        info!(return_id = %ret.id(), order_id = %order.id(), "return requested");

        self.publisher
            .publish(DomainEvent::Return(ReturnEvent::Requested {
                return_id: ret.id().to_string(),
                order_id: order.id().to_string(),
                item_count,
            }))
            .await;
        Ok(ReturnOutcome {
            ret,
            warnings: Vec::new(),
        })
    }

    /// Move the return along the aggregate graph (admin/warehouse actors).
    /// Assigning a pickup issues a fresh pickup code to the customer.
    #[instrument(skip(self, request), fields(return_id = %return_id, status = %request.status))]
    pub async fn update_status(
        &self,
        return_id: &str,
        request: ReturnTransitionRequest,
        actor: &ActorContext,
    ) -> Result<ReturnOutcome> {
        let mut ret = self.fetch(return_id).await?;
        self.authorize_against_order(&ret, Action::TransitionReturn, actor)
            .await?;
        if matches!(
            request.status,
            ReturnStatus::Refunded | ReturnStatus::PartiallyRefunded
        ) {
            return Err(ServiceError::Validation(
                "refund statuses are reached through the refund operation".to_string(),
            ));
        }
        let from = ret.status();
        if !from.can_transition_to(request.status) {
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: request.status.to_string(),
            });
        }

        let mut warnings = Vec::new();
        let mut assigned_agent = None;
        match request.status {
            ReturnStatus::PickupAssigned => {
                let agent = request.agent.ok_or_else(|| {
                    ServiceError::Validation(
                        "pickup assignment requires an agent".to_string(),
                    )
                })?;
                assigned_agent = Some(agent.agent_id.clone());
                ret.set_pickup_agent(AgentAssignment {
                    agent_id: agent.agent_id,
                    name: agent.name,
                    phone: agent.phone,
                    assigned_by: actor.actor_id.clone(),
                    assigned_at: Utc::now(),
                });
                self.issue_pickup_otp(&mut ret, actor, &mut warnings).await;
            }
            ReturnStatus::PickupRejected => ret.clear_pickup_agent(),
            _ => {}
        }

        let note = request
            .note
            .unwrap_or_else(|| format!("Status changed to {}", request.status));
        ret.record_status(request.status, &actor.actor_id, note)?;
        let ret = self.returns.update_return(ret).await?;

        info!(return_id = %ret.id(), from = %from, to = %request.status, "return status changed");
        if let Some(agent_id) = assigned_agent {
            self.publisher
                .publish(DomainEvent::Return(ReturnEvent::PickupAssigned {
                    return_id: ret.id().to_string(),
                    agent_id,
                }))
                .await;
        }
        self.publisher
            .publish(DomainEvent::Return(ReturnEvent::StatusChanged {
                return_id: ret.id().to_string(),
                from: from.to_string(),
                to: request.status.to_string(),
            }))
            .await;
        Ok(ReturnOutcome { ret, warnings })
    }

    /// The assigned agent rejects or collects the pickup. Collection
    /// requires the pickup code to have been verified first.
    #[instrument(skip(self), fields(return_id = %return_id, action = ?action))]
    pub async fn update_pickup_status(
        &self,
        return_id: &str,
        action: PickupAction,
        actor: &ActorContext,
    ) -> Result<ReturnOutcome> {
        actor.authorize(Action::UpdatePickup)?;
        let mut ret = self.fetch(return_id).await?;
        let assigned = ret
            .pickup_agent()
            .ok_or_else(|| ServiceError::InvalidState("no pickup agent assigned".to_string()))?;
        if assigned.agent_id != actor.actor_id {
            return Err(ServiceError::Forbidden(
                "pickup is assigned to a different agent".to_string(),
            ));
        }

        let from = ret.status();
        let to = match action {
            PickupAction::Reject => {
                ret.record_status(
                    ReturnStatus::PickupRejected,
                    &actor.actor_id,
                    "Pickup rejected by agent",
                )?;
                ret.clear_pickup_agent();
                ReturnStatus::PickupRejected
            }
            PickupAction::Collect => {
                if !ret.pickup_otp_verified() {
                    return Err(ServiceError::InvalidState(
                        "pickup code has not been verified".to_string(),
                    ));
                }
                ret.record_status(
                    ReturnStatus::PickedUp,
                    &actor.actor_id,
                    "Items collected by agent",
                )?;
                ret.mark_picked_up();
                ReturnStatus::PickedUp
            }
        };
        let ret = self.returns.update_return(ret).await?;

        info!(return_id = %ret.id(), from = %from, to = %to, "pickup status updated");
        self.publisher
            .publish(DomainEvent::Return(ReturnEvent::StatusChanged {
                return_id: ret.id().to_string(),
                from: from.to_string(),
                to: to.to_string(),
            }))
            .await;
        Ok(ReturnOutcome {
            ret,
            warnings: Vec::new(),
        })
    }

    /// Check the customer's pickup code. The assigned agent or an admin may
    /// verify; success stamps the aggregate but does not advance status.
    #[instrument(skip(self, code), fields(return_id = %return_id))]
    pub async fn verify_pickup_otp(
        &self,
        return_id: &str,
        code: &str,
        actor: &ActorContext,
    ) -> Result<ReturnOutcome> {
        actor.authorize(Action::VerifyPickupOtp)?;
        let mut ret = self.fetch(return_id).await?;
        if actor.role == Role::DeliveryAgent {
            let assigned = ret.pickup_agent().ok_or_else(|| {
                ServiceError::InvalidState("no pickup agent assigned".to_string())
            })?;
            if assigned.agent_id != actor.actor_id {
                return Err(ServiceError::Forbidden(
                    "pickup is assigned to a different agent".to_string(),
                ));
            }
        }

        self.otp
            .verify(ret.id(), code, &actor.actor_id, false)
            .await?;
        ret.mark_pickup_otp_verified()?;
        ret.record_note(&actor.actor_id, "Pickup code verified");
        let ret = self.returns.update_return(ret).await?;
        Ok(ReturnOutcome {
            ret,
            warnings: Vec::new(),
        })
    }

    /// Apply per-item refunds once the goods are back. Gateway refunds move
    /// money first and abort on failure; manual methods settle offline.
    /// A fully refunded return restocks its quantities.
    #[instrument(skip(self, request), fields(return_id = %return_id))]
    pub async fn process_refund(
        &self,
        return_id: &str,
        request: ProcessRefundRequest,
        actor: &ActorContext,
    ) -> Result<RefundOutcome> {
        let mut ret = self.fetch(return_id).await?;
        self.authorize_against_order(&ret, Action::ProcessRefund, actor)
            .await?;
        if !ret.status().accepts_refunds() {
            return Err(ServiceError::InvalidState(format!(
                "refunds cannot be applied while return is {}",
                ret.status()
            )));
        }
        if request.refunds.is_empty() {
            return Err(ServiceError::Validation(
                "at least one item refund is required".to_string(),
            ));
        }

        let currency = ret.refunded_amount().currency().to_string();
        let mut total = Money::zero(&currency);
        let mut refunds = Vec::with_capacity(request.refunds.len());
        for entry in &request.refunds {
            let item = ret.item(&entry.item_id).ok_or_else(|| {
                ServiceError::Validation(format!(
                    "item {} does not belong to this return",
                    entry.item_id
                ))
            })?;
            if item.status == ItemReturnStatus::Refunded {
                return Err(ServiceError::Validation(format!(
                    "item {} is already refunded",
                    entry.item_id
                )));
            }
            let amount = Money::new(entry.refund_amount, &currency);
            if !amount.is_positive() {
                return Err(ServiceError::Validation(format!(
                    "refund amount for item {} must be positive",
                    entry.item_id
                )));
            }
            total = total
                .add(&amount)
                .map_err(|e| ServiceError::Validation(e.to_string()))?;
            refunds.push((entry.item_id.clone(), amount));
        }

        // Reverse funds through the gateway before any aggregate mutation.
        let mut refund_reference = None;
        if request.method == RefundMethod::Gateway {
            let order = self
                .orders
                .get_order(ret.order_id())
                .await?
                .ok_or_else(|| ServiceError::not_found("order", ret.order_id()))?;
            let txn = match (&order.payment().method, &order.payment().transaction_id) {
                (PaymentMethod::Online, Some(txn)) => txn.clone(),
                _ => {
                    return Err(ServiceError::Validation(
                        "order has no online payment to reverse".to_string(),
                    ))
                }
            };
            let receipt = self.payments.refund(&txn, Some(total.clone())).await?;
            refund_reference = Some(receipt.refund_ref);
        }

        let applied = ret.apply_refunds(&refunds, request.method, &actor.actor_id)?;
        if let Some(reference) = &refund_reference {
            ret.record_note(&actor.actor_id, format!("Gateway refund {}", reference));
        }
        let fully_refunded = ret.status() == ReturnStatus::Refunded;
        let ret = self.returns.update_return(ret).await?;

        // Returned goods go back on the shelf once everything is refunded.
        let mut warnings = Vec::new();
        if fully_refunded {
            let lines: Vec<StockLine> = ret.items().iter().map(StockLine::from).collect();
            let report = self.ledger.release(&lines).await;
            if let Some(summary) = report.failure_summary() {
                warn!(return_id = %ret.id(), summary = %summary, "restock incomplete");
                warnings.push(format!("restock incomplete: {}", summary));
            }
        }

        info!(
            return_id = %ret.id(),
            amount = %applied,
            method = ?request.method,
            fully_refunded,
            "refund processed"
        );
        self.publisher
            .publish(DomainEvent::Return(ReturnEvent::Refunded {
                return_id: ret.id().to_string(),
                amount: applied.amount(),
                partial: !fully_refunded,
            }))
            .await;
        Ok(RefundOutcome {
            ret,
            refund_reference,
            warnings,
        })
    }

    pub async fn get_return(&self, return_id: &str, actor: &ActorContext) -> Result<Return> {
        actor.authorize(Action::ViewReturn)?;
        let ret = self.fetch(return_id).await?;
        let visible = match actor.role {
            Role::Admin | Role::Warehouse => true,
            Role::Customer => ret.customer_id() == actor.actor_id,
            Role::DeliveryAgent => ret
                .pickup_agent()
                .map(|a| a.agent_id == actor.actor_id)
                .unwrap_or(false),
        };
        if !visible {
            return Err(ServiceError::Forbidden(
                "return is outside the actor's scope".to_string(),
            ));
        }
        Ok(ret)
    }

    pub async fn list_returns(
        &self,
        mut filter: ReturnFilter,
        page: u64,
        per_page: u64,
        actor: &ActorContext,
    ) -> Result<Vec<Return>> {
        actor.authorize(Action::ViewReturn)?;
        match actor.role {
            Role::Admin | Role::Warehouse => {}
            Role::Customer => filter.customer_id = Some(actor.actor_id.clone()),
            Role::DeliveryAgent => {
                return Err(ServiceError::Forbidden(
                    "delivery agents may not list returns".to_string(),
                ))
            }
        }
        self.returns.list_returns(filter, page, per_page).await
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    async fn fetch(&self, return_id: &str) -> Result<Return> {
        self.returns
            .get_return(return_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("return", return_id))
    }

    /// Warehouse scope rides on the originating order. Returns whose order
    /// has vanished fall back to the plain role check.
    async fn authorize_against_order(
        &self,
        ret: &Return,
        action: Action,
        actor: &ActorContext,
    ) -> Result<()> {
        actor.authorize(action)?;
        if let Some(order) = self.orders.get_order(ret.order_id()).await? {
            actor.authorize_scoped(action, &order.warehouse().id)?;
        }
        Ok(())
    }

    /// Return window: order-line snapshot, then the live product document,
    /// then the configured default.
    async fn return_window_for(
        &self,
        item: &crate::domain::aggregates::OrderItem,
    ) -> Result<u32> {
        if let Some(days) = item.return_window_days {
            return Ok(days);
        }
        if let Some(product) = self.products.get_product(&item.product_id).await? {
            if let Some(days) = product.return_window_days() {
                return Ok(days);
            }
        }
        Ok(self.config.default_return_window_days)
    }

    async fn issue_pickup_otp(
        &self,
        ret: &mut Return,
        actor: &ActorContext,
        warnings: &mut Vec<String>,
    ) {
        let issued = self
            .otp
            .issue(
                ret.id(),
                &actor.actor_id,
                self.config.pickup_otp_ttl,
                OtpKeying::Subject,
            )
            .await;
        let hours = self.config.pickup_otp_ttl.as_secs() / 3600;
        let message = format!(
            "Your pickup confirmation code for return {} is {}. Valid for {} hours.",
            ret.id(),
            issued.code,
            hours
        );
        let sms_sent = self.notifier.send_text(ret.customer_phone(), &message).await;
        if !sms_sent {
            warn!(return_id = %ret.id(), "pickup code SMS dispatch failed");
            warnings.push("pickup code generated but SMS dispatch failed".to_string());
        }
        ret.set_pickup_otp(OtpIssuance {
            session_id: issued.key,
            issued_at: issued.issued_at,
            expires_at: issued.expires_at,
            verified_at: None,
        });
    }
}
