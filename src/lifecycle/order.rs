//! Order lifecycle service
//!
//! Owns the order status graph and its coupling to payment status and
//! inventory. Every mutation is a read-modify-write against the order store
//! with a version check; best-effort side effects (stock, SMS, events) run
//! around the write and degrade to warnings instead of failing the request.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::domain::aggregates::{
    AgentAssignment, CancellationInfo, CustomerInfo, Order, OrderItem, OrderStatus, OtpIssuance,
    PaymentMethod, PricingBreakdown, TrackingInfo, WarehouseInfo,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::Money;
use crate::error::{Result, ServiceError};
use crate::identity::{Action, ActorContext, Role};
use crate::inventory::{InventoryLedger, StockLine};
use crate::notify::Notifier;
use crate::otp::{OtpGate, OtpKeying};
use crate::payment::PaymentBridge;
use crate::publisher::EventPublisher;
use crate::store::{OrderFilter, OrderStore, ProductStore};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub customer: CustomerInfo,
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount: Decimal,
    /// Computed upstream by the delivery pricing collaborator.
    #[serde(default)]
    pub delivery_charge: Decimal,
    pub warehouse: WarehouseInfo,
    #[validate(length(min = 1, message = "delivery address is required"))]
    pub delivery_address: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub tax_rate: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub payment_ref: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tracking: Option<TrackingInfo>,
}

#[derive(Debug, Deserialize)]
pub struct AgentDetails {
    pub agent_id: String,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct OrderOutcome {
    pub order: Order,
    /// Best-effort side effects that did not land (stock, SMS).
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryOtpIssued {
    pub session_id: String,
    pub expires_at: chrono::DateTime<Utc>,
    pub sms_sent: bool,
    pub note: Option<String>,
}

#[derive(Clone)]
pub struct OrderLifecycle {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    ledger: InventoryLedger,
    otp: Arc<OtpGate>,
    payments: Arc<dyn PaymentBridge>,
    notifier: Arc<dyn Notifier>,
    publisher: Arc<EventPublisher>,
    config: AppConfig,
}

impl OrderLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
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

    /// Create an order at checkout. COD orders reserve inventory here;
    /// online orders reserve at payment verification.
    #[instrument(skip(self, request), fields(customer_id = %request.customer.id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        actor: &ActorContext,
    ) -> Result<OrderOutcome> {
        actor.authorize(Action::CreateOrder)?;
        validate_create(&request)?;

        let currency = request.currency.as_deref().unwrap_or("INR").to_string();
        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            // Snapshot the return policy from the catalog document when it
            // exists; orders survive later policy edits untouched.
            let policy = self.products.get_product(&line.product_id).await?;
            let (returnable, window) = policy
                .map(|p| (p.returnable(), p.return_window_days()))
                .unwrap_or((true, None));
            items.push(OrderItem {
                id: Uuid::new_v4().to_string(),
                product_id: line.product_id.clone(),
                variant_id: line.variant_id.clone(),
                name: line.name.clone(),
                unit_price: Money::new(line.unit_price, &currency),
                quantity: line.quantity,
                tax_rate: line.tax_rate,
                warehouse_id: request.warehouse.id.clone(),
                returnable,
                return_window_days: window,
            });
        }

        let cod_charge = match request.payment_method {
            PaymentMethod::Cod => Money::new(self.config.cod_charge, &currency),
            PaymentMethod::Online => Money::zero(&currency),
        };
        let pricing = PricingBreakdown::compute(
            &items,
            Money::new(request.discount, &currency),
            Money::new(request.delivery_charge, &currency),
            cod_charge,
        )?;

        let order = Order::create(
            request.customer,
            items,
            pricing,
            request.payment_method,
            request.warehouse,
            request.delivery_address,
        )?;
        let order = self.orders.insert_order(order).await?;
        info!(order_id = %order.id(), total = %order.pricing().total, "order created");

        let mut warnings = Vec::new();
        let order = match request.payment_method {
            PaymentMethod::Cod => self.reserve_stock(order, &mut warnings).await?,
            PaymentMethod::Online => order,
        };

        self.publisher
            .publish(DomainEvent::Order(OrderEvent::Created {
                order_id: order.id().to_string(),
                total: order.pricing().total.amount(),
            }))
            .await;
        Ok(OrderOutcome { order, warnings })
    }

    /// Verify an online payment's gateway signature, stamp the transaction
    /// and reserve inventory (the online-order call site).
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn verify_online_payment(
        &self,
        order_id: &str,
        request: VerifyPaymentRequest,
        actor: &ActorContext,
    ) -> Result<OrderOutcome> {
        actor.authorize(Action::VerifyPayment)?;
        let mut order = self.fetch(order_id).await?;
        if actor.role == Role::Customer && order.customer().id != actor.actor_id {
            return Err(ServiceError::Forbidden(
                "order belongs to a different customer".to_string(),
            ));
        }
        if order.payment().method != PaymentMethod::Online {
            return Err(ServiceError::InvalidState(
                "order was not placed with online payment".to_string(),
            ));
        }
        if order.payment().transaction_id.is_some() {
            return Err(ServiceError::InvalidState(
                "payment is already verified".to_string(),
            ));
        }

        let verified = self
            .payments
            .verify_signature(order.id(), &request.payment_ref, &request.signature)
            .await?;
        if !verified {
            return Err(ServiceError::Validation(
                "payment signature mismatch".to_string(),
            ));
        }

        order.set_transaction_id(request.payment_ref.clone());
        order.record_note(&actor.actor_id, "Payment verified");
        let order = self.orders.update_order(order).await?;

        let mut warnings = Vec::new();
        let order = self.reserve_stock(order, &mut warnings).await?;

        info!(order_id = %order.id(), "online payment verified");
        self.publisher
            .publish(DomainEvent::Order(OrderEvent::PaymentVerified {
                order_id: order.id().to_string(),
                transaction_id: request.payment_ref,
            }))
            .await;
        Ok(OrderOutcome { order, warnings })
    }

    /// Move an order along the status graph (warehouse/admin actors).
    #[instrument(skip(self, request), fields(order_id = %order_id, status = %request.status))]
    pub async fn transition_status(
        &self,
        order_id: &str,
        request: TransitionRequest,
        actor: &ActorContext,
    ) -> Result<OrderOutcome> {
        let order = self.fetch(order_id).await?;
        actor.authorize_scoped(Action::TransitionOrder, &order.warehouse().id)?;
        let note = request
            .note
            .unwrap_or_else(|| format!("Status changed to {}", request.status));
        self.apply_transition(order, request.status, actor, note, request.tracking)
            .await
    }

    /// Assign a delivery agent without changing status.
    #[instrument(skip(self, agent), fields(order_id = %order_id, agent_id = %agent.agent_id))]
    pub async fn assign_delivery_agent(
        &self,
        order_id: &str,
        agent: AgentDetails,
        actor: &ActorContext,
    ) -> Result<OrderOutcome> {
        let mut order = self.fetch(order_id).await?;
        actor.authorize_scoped(Action::AssignDeliveryAgent, &order.warehouse().id)?;
        let agent_id = agent.agent_id.clone();
        order.assign_agent(AgentAssignment {
            agent_id: agent.agent_id,
            name: agent.name,
            phone: agent.phone,
            assigned_by: actor.actor_id.clone(),
            assigned_at: Utc::now(),
        })?;
        let order = self.orders.update_order(order).await?;
        self.publisher
            .publish(DomainEvent::Order(OrderEvent::AgentAssigned {
                order_id: order.id().to_string(),
                agent_id,
            }))
            .await;
        Ok(OrderOutcome {
            order,
            warnings: Vec::new(),
        })
    }

    /// Issue the delivery confirmation code and text it to the customer.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn generate_delivery_otp(
        &self,
        order_id: &str,
        actor: &ActorContext,
    ) -> Result<DeliveryOtpIssued> {
        actor.authorize(Action::GenerateDeliveryOtp)?;
        let mut order = self.fetch(order_id).await?;
        self.check_delivery_scope(&order, actor)?;

        let issued = self
            .otp
            .issue(
                order.id(),
                &actor.actor_id,
                self.config.delivery_otp_ttl,
                OtpKeying::Session,
            )
            .await;
        let minutes = self.config.delivery_otp_ttl.as_secs() / 60;
        let message = format!(
            "Your delivery confirmation code for order {} is {}. Valid for {} minutes.",
            order.id(),
            issued.code,
            minutes
        );
        let sms_sent = self
            .notifier
            .send_text(&order.customer().phone, &message)
            .await;
        if !sms_sent {
            warn!(order_id = %order.id(), "delivery code SMS dispatch failed");
        }

        order.set_delivery_otp(OtpIssuance {
            session_id: issued.key.clone(),
            issued_at: issued.issued_at,
            expires_at: issued.expires_at,
            verified_at: None,
        });
        order.record_note(&actor.actor_id, "Delivery code issued");
        self.orders.update_order(order).await?;

        Ok(DeliveryOtpIssued {
            session_id: issued.key,
            expires_at: issued.expires_at,
            sms_sent,
            note: (!sms_sent).then(|| "code generated but SMS dispatch failed".to_string()),
        })
    }

    /// Verify the delivery code and complete the order. The code must have
    /// been requested by this same actor and verifies at most once.
    #[instrument(skip(self, code), fields(order_id = %order_id))]
    pub async fn verify_delivery_otp_and_deliver(
        &self,
        order_id: &str,
        session_id: &str,
        code: &str,
        actor: &ActorContext,
        note: Option<String>,
    ) -> Result<OrderOutcome> {
        actor.authorize(Action::ConfirmDelivery)?;
        let mut order = self.fetch(order_id).await?;
        self.check_delivery_scope(&order, actor)?;

        self.otp
            .verify(session_id, code, &actor.actor_id, true)
            .await?;
        order.mark_delivery_otp_verified();
        let note = note.unwrap_or_else(|| "Delivered (code verified)".to_string());
        self.apply_transition(order, OrderStatus::Delivered, actor, note, None)
            .await
    }

    /// Cancel an order that has not yet been delivered.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: &str,
        reason: String,
        actor: &ActorContext,
    ) -> Result<OrderOutcome> {
        actor.authorize(Action::CancelOrder)?;
        let mut order = self.fetch(order_id).await?;
        match actor.role {
            Role::Admin => {}
            Role::Warehouse => {
                actor.authorize_scoped(Action::CancelOrder, &order.warehouse().id)?
            }
            Role::Customer => {
                if order.customer().id != actor.actor_id {
                    return Err(ServiceError::Forbidden(
                        "order belongs to a different customer".to_string(),
                    ));
                }
                if order.status() != OrderStatus::New {
                    return Err(ServiceError::InvalidState(
                        "customers may only cancel orders that have not been processed"
                            .to_string(),
                    ));
                }
            }
            Role::DeliveryAgent => {
                return Err(ServiceError::Forbidden(
                    "delivery agents may not cancel orders".to_string(),
                ))
            }
        }
        if !order.status().is_cancellable() {
            return Err(ServiceError::InvalidState(format!(
                "order can no longer be cancelled (status {})",
                order.status()
            )));
        }

        order.set_cancellation(CancellationInfo {
            reason: reason.clone(),
            cancelled_by: actor.actor_id.clone(),
            cancelled_at: Utc::now(),
            refund_reference: None,
        });
        let outcome = self
            .apply_transition(
                order,
                OrderStatus::Cancelled,
                actor,
                format!("Order cancelled: {}", reason),
                None,
            )
            .await?;
        self.publisher
            .publish(DomainEvent::Order(OrderEvent::Cancelled {
                order_id: outcome.order.id().to_string(),
                reason,
            }))
            .await;
        Ok(outcome)
    }

    pub async fn get_order(&self, order_id: &str, actor: &ActorContext) -> Result<Order> {
        actor.authorize(Action::ViewOrder)?;
        let order = self.fetch(order_id).await?;
        let visible = match actor.role {
            Role::Admin => true,
            Role::Warehouse => actor.has_warehouse_scope(&order.warehouse().id),
            Role::Customer => order.customer().id == actor.actor_id,
            Role::DeliveryAgent => order
                .delivery_agent()
                .map(|a| a.agent_id == actor.actor_id)
                .unwrap_or(false),
        };
        if !visible {
            return Err(ServiceError::Forbidden(
                "order is outside the actor's scope".to_string(),
            ));
        }
        Ok(order)
    }

    pub async fn list_orders(
        &self,
        mut filter: OrderFilter,
        page: u64,
        per_page: u64,
        actor: &ActorContext,
    ) -> Result<Vec<Order>> {
        actor.authorize(Action::ViewOrder)?;
        match actor.role {
            Role::Admin => {}
            Role::Warehouse => match &filter.warehouse_id {
                Some(w) if actor.has_warehouse_scope(w) => {}
                Some(w) => {
                    return Err(ServiceError::Forbidden(format!(
                        "warehouse {} is outside the actor's scope",
                        w
                    )))
                }
                None => {
                    return Err(ServiceError::Validation(
                        "warehouse actors must filter by warehouse_id".to_string(),
                    ))
                }
            },
            Role::Customer => filter.customer_id = Some(actor.actor_id.clone()),
            Role::DeliveryAgent => {
                return Err(ServiceError::Forbidden(
                    "delivery agents may not list orders".to_string(),
                ))
            }
        }
        self.orders.list_orders(filter, page, per_page).await
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    async fn fetch(&self, order_id: &str) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("order", order_id))
    }

    /// Delivery-flow scope: admins, warehouse actors scoped to the order's
    /// warehouse, or the assigned delivery agent.
    fn check_delivery_scope(&self, order: &Order, actor: &ActorContext) -> Result<()> {
        match actor.role {
            Role::Admin => Ok(()),
            Role::Warehouse => {
                if actor.has_warehouse_scope(&order.warehouse().id) {
                    Ok(())
                } else {
                    Err(ServiceError::Forbidden(
                        "order is outside the actor's warehouse scope".to_string(),
                    ))
                }
            }
            Role::DeliveryAgent => match order.delivery_agent() {
                None => Err(ServiceError::Forbidden(
                    "order has no assigned delivery agent".to_string(),
                )),
                Some(a) if a.agent_id == actor.actor_id => Ok(()),
                Some(_) => Err(ServiceError::Forbidden(
                    "order is assigned to a different agent".to_string(),
                )),
            },
            Role::Customer => Err(ServiceError::Forbidden(
                "customers may not drive delivery confirmation".to_string(),
            )),
        }
    }

    /// Shared transition path: legal-edge check, gateway refund when money
    /// must move, the single status write, then best-effort stock release.
    async fn apply_transition(
        &self,
        mut order: Order,
        next: OrderStatus,
        actor: &ActorContext,
        note: String,
        tracking: Option<TrackingInfo>,
    ) -> Result<OrderOutcome> {
        let from = order.status();
        if !from.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        // Money moves before the aggregate is marked refunded; a gateway
        // failure aborts the whole transition. The refund reference doubles
        // as the exactly-once latch for the idempotent refunded edge.
        let needs_gateway_refund = next == OrderStatus::Refunded
            && from != OrderStatus::Refunded
            && order.payment().method == PaymentMethod::Online
            && order
                .cancellation()
                .map_or(true, |c| c.refund_reference.is_none());
        if needs_gateway_refund {
            if let Some(txn) = order.payment().transaction_id.clone() {
                let receipt = self
                    .payments
                    .refund(&txn, Some(order.pricing().total.clone()))
                    .await?;
                order.set_refund_reference(receipt.refund_ref);
            }
        }

        // Release exactly once: gate on the previous status not already
        // being a released state, and on the reservation having landed.
        let releasing =
            next.releases_stock() && !from.releases_stock() && order.stock_reserved()
                && !order.stock_released();
        if releasing {
            order.mark_stock_released();
        }

        order.record_status(next, &actor.actor_id, note)?;
        if let Some(t) = tracking {
            order.set_tracking(t);
        }
        let order = self.orders.update_order(order).await?;

        let mut warnings = Vec::new();
        if releasing {
            let lines: Vec<StockLine> = order.items().iter().map(StockLine::from).collect();
            let report = self.ledger.release(&lines).await;
            if let Some(summary) = report.failure_summary() {
                warnings.push(format!("stock release incomplete: {}", summary));
            }
        }

        info!(order_id = %order.id(), from = %from, to = %next, "order status changed");
        self.publisher
            .publish(DomainEvent::Order(OrderEvent::StatusChanged {
                order_id: order.id().to_string(),
                from: from.to_string(),
                to: next.to_string(),
            }))
            .await;
        Ok(OrderOutcome { order, warnings })
    }

    /// Best-effort reservation; failure surfaces as a warning, never rolls
    /// back the order.
    async fn reserve_stock(
        &self,
        mut order: Order,
        warnings: &mut Vec<String>,
    ) -> Result<Order> {
        let lines: Vec<StockLine> = order.items().iter().map(StockLine::from).collect();
        let report = self.ledger.reserve(&lines).await;
        if report.all_ok() {
            order.mark_stock_reserved();
            return self.orders.update_order(order).await;
        }
        let summary = report
            .failure_summary()
            .unwrap_or_else(|| "unknown".to_string());
        warn!(order_id = %order.id(), summary = %summary, "inventory reservation incomplete");
        warnings.push(format!("inventory reservation incomplete: {}", summary));
        Ok(order)
    }
}

fn validate_create(request: &CreateOrderRequest) -> Result<()> {
    request
        .validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;
    let c = &request.customer;
    if c.id.is_empty() || c.name.is_empty() || c.phone.is_empty() {
        return Err(ServiceError::Validation(
            "customer id, name and phone are required".to_string(),
        ));
    }
    let w = &request.warehouse;
    if w.id.is_empty() || w.name.is_empty() {
        return Err(ServiceError::Validation(
            "warehouse id and name are required".to_string(),
        ));
    }
    for item in &request.items {
        if item.product_id.is_empty() || item.name.is_empty() {
            return Err(ServiceError::Validation(
                "every item needs a product id and name".to_string(),
            ));
        }
        if item.quantity == 0 {
            return Err(ServiceError::Validation(format!(
                "quantity for {} must be positive",
                item.product_id
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::Validation(format!(
                "unit price for {} must not be negative",
                item.product_id
            )));
        }
    }
    Ok(())
}
