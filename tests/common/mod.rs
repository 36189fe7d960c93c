//! Shared fixtures for the lifecycle integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use orderhub::config::AppConfig;
use orderhub::domain::aggregates::{
    CustomerInfo, Order, OrderStatus, PaymentMethod, Product, WarehouseInfo,
};
use orderhub::domain::value_objects::Money;
use orderhub::error::{Result, ServiceError};
use orderhub::identity::{ActorContext, Role};
use orderhub::inventory::InventoryLedger;
use orderhub::lifecycle::order::{CreateOrderRequest, OrderItemRequest, TransitionRequest};
use orderhub::lifecycle::{OrderLifecycle, ReturnLifecycle};
use orderhub::notify::Notifier;
use orderhub::otp::OtpGate;
use orderhub::payment::{PaymentBridge, PaymentRecord, RefundReceipt};
use orderhub::publisher::EventPublisher;
use orderhub::store::memory::InMemoryStore;
use orderhub::store::{OrderStore, ProductStore, ReturnStore};

/// Payment bridge double: accepts or rejects signatures and refunds on
/// demand, recording every refund it performs.
pub struct FakePaymentBridge {
    accept_signatures: AtomicBool,
    fail_refunds: AtomicBool,
    refund_counter: AtomicUsize,
    pub refunds: Mutex<Vec<(String, Option<Money>)>>,
}

impl FakePaymentBridge {
    pub fn new() -> Self {
        Self {
            accept_signatures: AtomicBool::new(true),
            fail_refunds: AtomicBool::new(false),
            refund_counter: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_signatures(&self) {
        self.accept_signatures.store(false, Ordering::SeqCst);
    }

    pub fn fail_refunds(&self) {
        self.fail_refunds.store(true, Ordering::SeqCst);
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentBridge for FakePaymentBridge {
    async fn verify_signature(&self, _: &str, _: &str, _: &str) -> Result<bool> {
        Ok(self.accept_signatures.load(Ordering::SeqCst))
    }

    async fn fetch_payment(&self, _payment_ref: &str) -> Result<PaymentRecord> {
        Ok(PaymentRecord {
            status: "captured".to_string(),
            method: "card".to_string(),
            amount: Money::inr(Decimal::ZERO),
        })
    }

    async fn refund(&self, payment_ref: &str, amount: Option<Money>) -> Result<RefundReceipt> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::Payment("gateway rejected refund".to_string()));
        }
        let n = self.refund_counter.fetch_add(1, Ordering::SeqCst);
        self.refunds
            .lock()
            .unwrap()
            .push((payment_ref.to_string(), amount.clone()));
        Ok(RefundReceipt {
            refund_ref: format!("REF-{}", n),
            amount: amount.unwrap_or_else(|| Money::inr(Decimal::ZERO)),
        })
    }
}

/// SMS double: records every message, optionally failing sends.
pub struct RecordingNotifier {
    fail: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn last_message(&self) -> String {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, m)| m.clone())
            .expect("no SMS was sent")
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, phone: &str, message: &str) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return false;
        }
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        true
    }
}

pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub otp: Arc<OtpGate>,
    pub payments: Arc<FakePaymentBridge>,
    pub notifier: Arc<RecordingNotifier>,
    pub orders: OrderLifecycle,
    pub returns: ReturnLifecycle,
    pub config: AppConfig,
}

pub fn harness() -> TestHarness {
    // Zero COD charge keeps the arithmetic in the scenarios exact.
    let config = AppConfig {
        cod_charge: Decimal::ZERO,
        ..AppConfig::default()
    };
    harness_with_config(config)
}

pub fn harness_with_config(config: AppConfig) -> TestHarness {
    let store = Arc::new(InMemoryStore::new());
    let otp = Arc::new(OtpGate::new());
    let payments = Arc::new(FakePaymentBridge::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let publisher = Arc::new(EventPublisher::disabled());
    let ledger = InventoryLedger::new(store.clone() as Arc<dyn ProductStore>);

    let orders = OrderLifecycle::new(
        store.clone() as Arc<dyn OrderStore>,
        store.clone() as Arc<dyn ProductStore>,
        ledger.clone(),
        otp.clone(),
        payments.clone() as Arc<dyn PaymentBridge>,
        notifier.clone() as Arc<dyn Notifier>,
        publisher.clone(),
        config.clone(),
    );
    let returns = ReturnLifecycle::new(
        store.clone() as Arc<dyn ReturnStore>,
        store.clone() as Arc<dyn OrderStore>,
        store.clone() as Arc<dyn ProductStore>,
        ledger,
        otp.clone(),
        payments.clone() as Arc<dyn PaymentBridge>,
        notifier.clone() as Arc<dyn Notifier>,
        publisher,
        config.clone(),
    );

    TestHarness {
        store,
        otp,
        payments,
        notifier,
        orders,
        returns,
        config,
    }
}

impl TestHarness {
    /// Seed the two catalog products the standard order uses.
    pub async fn seed_products(&self) {
        self.store
            .insert_product(Product::new("P1", "Steel Bottle", 10).with_return_policy(true, Some(7)))
            .await
            .unwrap();
        self.store
            .insert_product(Product::new("P2", "Mug", 5).with_return_policy(true, Some(7)))
            .await
            .unwrap();
    }

    pub async fn store_order(&self, id: &str) -> Order {
        self.store.get_order(id).await.unwrap().expect("order missing")
    }

    pub async fn store_return(&self, id: &str) -> orderhub::domain::aggregates::Return {
        self.store
            .get_return(id)
            .await
            .unwrap()
            .expect("return missing")
    }

    pub async fn product_stock(&self, id: &str) -> i64 {
        self.store
            .get_product(id)
            .await
            .unwrap()
            .expect("product missing")
            .stock()
    }

    /// Walk an order to `delivered` with warehouse transitions.
    pub async fn deliver_order(&self, order_id: &str) -> Order {
        let wh = warehouse();
        for status in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            self.orders
                .transition_status(
                    order_id,
                    TransitionRequest {
                        status,
                        note: None,
                        tracking: None,
                    },
                    &wh,
                )
                .await
                .unwrap();
        }
        self.store.get_order(order_id).await.unwrap().unwrap()
    }

    /// Rewrite the stored order's delivery date `days` into the past, the
    /// way a document that old would look when read back.
    pub async fn backdate_delivery(&self, order_id: &str, days: i64) {
        let order = self.store.get_order(order_id).await.unwrap().unwrap();
        let mut doc = serde_json::to_value(&order).unwrap();
        doc["actual_delivery_date"] = json!(Utc::now() - Duration::days(days));
        let backdated: Order = serde_json::from_value(doc).unwrap();
        self.store.update_order(backdated).await.unwrap();
    }
}

pub fn admin() -> ActorContext {
    ActorContext::new("admin-1", Role::Admin, vec![])
}

pub fn warehouse() -> ActorContext {
    ActorContext::new("wh-user-1", Role::Warehouse, vec!["WH-1".to_string()])
}

pub fn foreign_warehouse() -> ActorContext {
    ActorContext::new("wh-user-2", Role::Warehouse, vec!["WH-2".to_string()])
}

pub fn agent(id: &str) -> ActorContext {
    ActorContext::new(id, Role::DeliveryAgent, vec![])
}

pub fn customer(id: &str) -> ActorContext {
    ActorContext::new(id, Role::Customer, vec![])
}

/// The standard two-line order: 2 x 100 of P1 and 1 x 50 of P2, no tax.
pub fn order_request(method: PaymentMethod) -> CreateOrderRequest {
    CreateOrderRequest {
        customer: CustomerInfo {
            id: "cust-1".to_string(),
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
            phone: "+911234567890".to_string(),
        },
        items: vec![
            OrderItemRequest {
                product_id: "P1".to_string(),
                variant_id: None,
                name: "Steel Bottle".to_string(),
                unit_price: Decimal::new(100, 0),
                quantity: 2,
                tax_rate: Decimal::ZERO,
            },
            OrderItemRequest {
                product_id: "P2".to_string(),
                variant_id: None,
                name: "Mug".to_string(),
                unit_price: Decimal::new(50, 0),
                quantity: 1,
                tax_rate: Decimal::ZERO,
            },
        ],
        payment_method: method,
        discount: Decimal::ZERO,
        delivery_charge: Decimal::ZERO,
        warehouse: WarehouseInfo {
            id: "WH-1".to_string(),
            name: "Central".to_string(),
            address: "1 Depot Rd".to_string(),
        },
        delivery_address: "22 Lake View, Pune".to_string(),
        currency: None,
    }
}

/// Pull the 4-digit code out of a confirmation SMS.
pub fn extract_code(message: &str) -> String {
    message
        .split(" is ")
        .nth(1)
        .expect("unexpected SMS format")
        .chars()
        .take(4)
        .collect()
}
