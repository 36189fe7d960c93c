//! Integration tests for the return lifecycle
//!
//! Exercises the return graph end to end: window checks at creation, pickup
//! assignment with OTP-gated collection, per-item refunds with the aggregate
//! rollup, gateway coupling and restocking.

mod common;

use common::*;

use chrono::Duration;
use rust_decimal::Decimal;

use orderhub::domain::aggregates::{
    ItemReturnStatus, PaymentMethod, Product, RefundMethod, Return, ReturnStatus,
};
use orderhub::error::ServiceError;
use orderhub::lifecycle::order::{AgentDetails, VerifyPaymentRequest};
use orderhub::lifecycle::returns::{
    CreateReturnRequest, ItemRefundRequest, PickupAction, ProcessRefundRequest,
    ReturnItemRequest, ReturnTransitionRequest,
};
use orderhub::store::ProductStore;

fn agent_details(id: &str) -> AgentDetails {
    AgentDetails {
        agent_id: id.to_string(),
        name: "Ravi".to_string(),
        phone: "+919999999999".to_string(),
    }
}

fn return_transition(status: ReturnStatus) -> ReturnTransitionRequest {
    ReturnTransitionRequest {
        status,
        note: None,
        agent: None,
    }
}

fn assign_pickup(agent_id: &str) -> ReturnTransitionRequest {
    ReturnTransitionRequest {
        status: ReturnStatus::PickupAssigned,
        note: None,
        agent: Some(agent_details(agent_id)),
    }
}

/// Create a COD order for cust-1, deliver it, and return the order id.
async fn delivered_order(h: &TestHarness) -> String {
    let order_id = h
        .orders
        .create_order(order_request(PaymentMethod::Cod), &customer("cust-1"))
        .await
        .unwrap()
        .order
        .id()
        .to_string();
    h.deliver_order(&order_id).await;
    order_id
}

/// Return request for the single-quantity Mug line of the order.
async fn mug_return_request(h: &TestHarness, order_id: &str) -> CreateReturnRequest {
    let order = h.store_order(order_id).await;
    let mug = order
        .items()
        .iter()
        .find(|i| i.product_id == "P2")
        .unwrap();
    CreateReturnRequest {
        order_id: order_id.to_string(),
        items: vec![ReturnItemRequest {
            order_item_id: mug.id.clone(),
            quantity: 1,
        }],
        reason: "damaged".to_string(),
        pickup_address: "22 Lake View, Pune".to_string(),
        pickup_instructions: None,
    }
}

/// Walk a requested return to `received`, driving the pickup through agent
/// `agent_id` with OTP verification.
async fn receive_return(h: &TestHarness, ret: &Return, agent_id: &str) {
    let wh = warehouse();
    h.returns
        .update_status(ret.id(), return_transition(ReturnStatus::Approved), &wh)
        .await
        .unwrap();
    h.returns
        .update_status(ret.id(), assign_pickup(agent_id), &wh)
        .await
        .unwrap();
    let code = extract_code(&h.notifier.last_message());
    h.returns
        .verify_pickup_otp(ret.id(), &code, &agent(agent_id))
        .await
        .unwrap();
    h.returns
        .update_pickup_status(ret.id(), PickupAction::Collect, &agent(agent_id))
        .await
        .unwrap();
    h.returns
        .update_status(ret.id(), return_transition(ReturnStatus::Received), &wh)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_return_scenario_reject_reassign_collect_refund() {
    let h = harness();
    h.seed_products().await;
    let order_id = delivered_order(&h).await;
    assert_eq!(h.product_stock("P2").await, 4);

    let req = mug_return_request(&h, &order_id).await;
    let ret = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap()
        .ret;
    assert_eq!(ret.status(), ReturnStatus::Requested);

    let wh = warehouse();
    h.returns
        .update_status(ret.id(), return_transition(ReturnStatus::Approved), &wh)
        .await
        .unwrap();

    // Assign A1: a pickup code goes to the customer with a day-long TTL.
    let outcome = h
        .returns
        .update_status(ret.id(), assign_pickup("A1"), &wh)
        .await
        .unwrap();
    let otp = outcome.ret.pickup_otp().unwrap().clone();
    assert!(otp.expires_at - otp.issued_at >= Duration::hours(23));
    assert_eq!(outcome.ret.pickup_agent().unwrap().agent_id, "A1");

    // A1 rejects; the assignment is cleared.
    let outcome = h
        .returns
        .update_pickup_status(ret.id(), PickupAction::Reject, &agent("A1"))
        .await
        .unwrap();
    assert_eq!(outcome.ret.status(), ReturnStatus::PickupRejected);
    assert!(outcome.ret.pickup_agent().is_none());

    // Reassign to A2, verify the fresh code, collect.
    h.returns
        .update_status(ret.id(), assign_pickup("A2"), &wh)
        .await
        .unwrap();
    let code = extract_code(&h.notifier.last_message());
    h.returns
        .verify_pickup_otp(ret.id(), &code, &agent("A2"))
        .await
        .unwrap();
    let outcome = h
        .returns
        .update_pickup_status(ret.id(), PickupAction::Collect, &agent("A2"))
        .await
        .unwrap();
    assert_eq!(outcome.ret.status(), ReturnStatus::PickedUp);
    assert!(outcome.ret.picked_up_at().is_some());

    h.returns
        .update_status(ret.id(), return_transition(ReturnStatus::Received), &wh)
        .await
        .unwrap();

    // Refund the 50 for the mug; the return rolls up to refunded and the
    // unit goes back on the shelf.
    let item_id = h.store_return(ret.id()).await.items()[0].id.clone();
    let outcome = h
        .returns
        .process_refund(
            ret.id(),
            ProcessRefundRequest {
                refunds: vec![ItemRefundRequest {
                    item_id,
                    refund_amount: Decimal::new(50, 0),
                }],
                method: RefundMethod::Manual,
            },
            &wh,
        )
        .await
        .unwrap();
    assert_eq!(outcome.ret.status(), ReturnStatus::Refunded);
    assert_eq!(outcome.ret.refunded_amount().amount(), Decimal::new(50, 0));
    assert!(outcome.warnings.is_empty());
    assert_eq!(h.product_stock("P2").await, 5);
    // Manual refunds never touch the gateway.
    assert_eq!(h.payments.refund_count(), 0);
}

#[tokio::test]
async fn test_return_window_boundary() {
    let h = harness();
    h.seed_products().await;

    // Exactly at the 7-day window: still allowed.
    let order_id = delivered_order(&h).await;
    h.backdate_delivery(&order_id, 7).await;
    let req = mug_return_request(&h, &order_id).await;
    h.returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap();

    // One day past: rejected per item.
    let order_id = delivered_order(&h).await;
    h.backdate_delivery(&order_id, 8).await;
    let req = mug_return_request(&h, &order_id).await;
    let err = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap_err();
    match err {
        ServiceError::ReturnWindowExpired {
            days_since_delivery,
            window_days,
            ..
        } => {
            assert_eq!(days_since_delivery, 8);
            assert_eq!(window_days, 7);
        }
        other => panic!("expected ReturnWindowExpired, got {other:?}"),
    }
}

#[tokio::test]
async fn test_not_returnable_item_rejected() {
    let h = harness();
    h.store
        .insert_product(Product::new("P1", "Steel Bottle", 10).with_return_policy(false, None))
        .await
        .unwrap();
    h.store
        .insert_product(Product::new("P2", "Mug", 5).with_return_policy(true, Some(7)))
        .await
        .unwrap();
    let order_id = delivered_order(&h).await;

    let order = h.store_order(&order_id).await;
    let bottle = order
        .items()
        .iter()
        .find(|i| i.product_id == "P1")
        .unwrap();
    let err = h
        .returns
        .create_return_request(
            CreateReturnRequest {
                order_id: order_id.clone(),
                items: vec![ReturnItemRequest {
                    order_item_id: bottle.id.clone(),
                    quantity: 1,
                }],
                reason: "unwanted".to_string(),
                pickup_address: "22 Lake View".to_string(),
                pickup_instructions: None,
            },
            &customer("cust-1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotReturnable(_)));
}

#[tokio::test]
async fn test_return_requires_delivered_order_and_owned_order() {
    let h = harness();
    h.seed_products().await;

    let order_id = h
        .orders
        .create_order(order_request(PaymentMethod::Cod), &customer("cust-1"))
        .await
        .unwrap()
        .order
        .id()
        .to_string();
    let order = h.store_order(&order_id).await;
    let req = CreateReturnRequest {
        order_id: order_id.clone(),
        items: vec![ReturnItemRequest {
            order_item_id: order.items()[0].id.clone(),
            quantity: 1,
        }],
        reason: "damaged".to_string(),
        pickup_address: "22 Lake View".to_string(),
        pickup_instructions: None,
    };

    // Not delivered yet.
    let err = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    // Delivered, but someone else's order.
    h.deliver_order(&order_id).await;
    let req = mug_return_request(&h, &order_id).await;
    let err = h
        .returns
        .create_return_request(req, &customer("cust-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn test_foreign_item_and_excess_quantity_rejected() {
    let h = harness();
    h.seed_products().await;
    let order_id = delivered_order(&h).await;

    let err = h
        .returns
        .create_return_request(
            CreateReturnRequest {
                order_id: order_id.clone(),
                items: vec![ReturnItemRequest {
                    order_item_id: "not-an-item".to_string(),
                    quantity: 1,
                }],
                reason: "damaged".to_string(),
                pickup_address: "22 Lake View".to_string(),
                pickup_instructions: None,
            },
            &customer("cust-1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let order = h.store_order(&order_id).await;
    let mug = order
        .items()
        .iter()
        .find(|i| i.product_id == "P2")
        .unwrap();
    let err = h
        .returns
        .create_return_request(
            CreateReturnRequest {
                order_id: order_id.clone(),
                items: vec![ReturnItemRequest {
                    order_item_id: mug.id.clone(),
                    quantity: 3,
                }],
                reason: "damaged".to_string(),
                pickup_address: "22 Lake View".to_string(),
                pickup_instructions: None,
            },
            &customer("cust-1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_collect_requires_verified_pickup_code() {
    let h = harness();
    h.seed_products().await;
    let order_id = delivered_order(&h).await;
    let req = mug_return_request(&h, &order_id).await;
    let ret = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap()
        .ret;

    let wh = warehouse();
    h.returns
        .update_status(ret.id(), return_transition(ReturnStatus::Approved), &wh)
        .await
        .unwrap();
    h.returns
        .update_status(ret.id(), assign_pickup("A1"), &wh)
        .await
        .unwrap();

    // Collecting before the code is verified is refused.
    let err = h
        .returns
        .update_pickup_status(ret.id(), PickupAction::Collect, &agent("A1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    // A wrong code is a mismatch and stays consumable.
    let code = extract_code(&h.notifier.last_message());
    let wrong = if code == "0000" { "0001" } else { "0000" };
    let err = h
        .returns
        .verify_pickup_otp(ret.id(), wrong, &agent("A1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OtpMismatch));

    // Only the assigned agent may drive the pickup.
    let err = h
        .returns
        .update_pickup_status(ret.id(), PickupAction::Collect, &agent("A2"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    h.returns
        .verify_pickup_otp(ret.id(), &code, &agent("A1"))
        .await
        .unwrap();
    let outcome = h
        .returns
        .update_pickup_status(ret.id(), PickupAction::Collect, &agent("A1"))
        .await
        .unwrap();
    assert_eq!(outcome.ret.status(), ReturnStatus::PickedUp);
}

#[tokio::test]
async fn test_partial_then_full_refund_through_gateway() {
    let h = harness();
    h.seed_products().await;

    // Online order so the gateway is involved in the reversal.
    let order_id = h
        .orders
        .create_order(order_request(PaymentMethod::Online), &customer("cust-1"))
        .await
        .unwrap()
        .order
        .id()
        .to_string();
    h.orders
        .verify_online_payment(
            &order_id,
            VerifyPaymentRequest {
                payment_ref: "pay_123".to_string(),
                signature: "sig".to_string(),
            },
            &customer("cust-1"),
        )
        .await
        .unwrap();
    h.deliver_order(&order_id).await;

    // Return both lines.
    let order = h.store_order(&order_id).await;
    let ret = h
        .returns
        .create_return_request(
            CreateReturnRequest {
                order_id: order_id.clone(),
                items: order
                    .items()
                    .iter()
                    .map(|i| ReturnItemRequest {
                        order_item_id: i.id.clone(),
                        quantity: i.quantity,
                    })
                    .collect(),
                reason: "damaged".to_string(),
                pickup_address: "22 Lake View".to_string(),
                pickup_instructions: None,
            },
            &customer("cust-1"),
        )
        .await
        .unwrap()
        .ret;
    receive_return(&h, &ret, "A1").await;

    let bottle_item = h
        .store_return(ret.id())
        .await
        .items()
        .iter()
        .find(|i| i.product_id == "P1")
        .unwrap()
        .id
        .clone();
    let mug_item = h
        .store_return(ret.id())
        .await
        .items()
        .iter()
        .find(|i| i.product_id == "P2")
        .unwrap()
        .id
        .clone();

    // First the bottles: a partial refund.
    let outcome = h
        .returns
        .process_refund(
            ret.id(),
            ProcessRefundRequest {
                refunds: vec![ItemRefundRequest {
                    item_id: bottle_item,
                    refund_amount: Decimal::new(200, 0),
                }],
                method: RefundMethod::Gateway,
            },
            &admin(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.ret.status(), ReturnStatus::PartiallyRefunded);
    assert_eq!(outcome.ret.refunded_amount().amount(), Decimal::new(200, 0));
    assert!(outcome.refund_reference.is_some());
    // No restock until everything is refunded.
    assert_eq!(h.product_stock("P1").await, 8);

    // Then the mug: the rollup completes and stock returns.
    let outcome = h
        .returns
        .process_refund(
            ret.id(),
            ProcessRefundRequest {
                refunds: vec![ItemRefundRequest {
                    item_id: mug_item,
                    refund_amount: Decimal::new(50, 0),
                }],
                method: RefundMethod::Gateway,
            },
            &admin(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.ret.status(), ReturnStatus::Refunded);
    assert_eq!(outcome.ret.refunded_amount().amount(), Decimal::new(250, 0));
    assert!(outcome
        .ret
        .items()
        .iter()
        .all(|i| i.status == ItemReturnStatus::Refunded));
    assert_eq!(h.product_stock("P1").await, 10);
    assert_eq!(h.product_stock("P2").await, 5);

    // Two gateway reversals against the original transaction.
    let refunds = h.payments.refunds.lock().unwrap().clone();
    assert_eq!(refunds.len(), 2);
    assert!(refunds.iter().all(|(txn, _)| txn == "pay_123"));
    assert_eq!(
        refunds[0].1.as_ref().unwrap().amount() + refunds[1].1.as_ref().unwrap().amount(),
        Decimal::new(250, 0)
    );
}

#[tokio::test]
async fn test_refund_guards() {
    let h = harness();
    h.seed_products().await;
    let order_id = delivered_order(&h).await;
    let req = mug_return_request(&h, &order_id).await;
    let ret = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap()
        .ret;
    let item_id = ret.items()[0].id.clone();

    // Not received yet.
    let err = h
        .returns
        .process_refund(
            ret.id(),
            ProcessRefundRequest {
                refunds: vec![ItemRefundRequest {
                    item_id: item_id.clone(),
                    refund_amount: Decimal::new(50, 0),
                }],
                method: RefundMethod::Manual,
            },
            &admin(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    receive_return(&h, &ret, "A1").await;

    // Non-positive amounts and foreign items are validation failures that
    // leave the aggregate untouched.
    for (bad_item, amount) in [
        (item_id.clone(), Decimal::ZERO),
        ("not-an-item".to_string(), Decimal::new(50, 0)),
    ] {
        let err = h
            .returns
            .process_refund(
                ret.id(),
                ProcessRefundRequest {
                    refunds: vec![ItemRefundRequest {
                        item_id: bad_item,
                        refund_amount: amount,
                    }],
                    method: RefundMethod::Manual,
                },
                &admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
    let stored = h.store_return(ret.id()).await;
    assert_eq!(stored.status(), ReturnStatus::Received);
    assert!(stored.items().iter().all(|i| i.refund_amount.is_none()));

    // Gateway refunds demand an online payment on the originating order.
    let err = h
        .returns
        .process_refund(
            ret.id(),
            ProcessRefundRequest {
                refunds: vec![ItemRefundRequest {
                    item_id: item_id.clone(),
                    refund_amount: Decimal::new(50, 0),
                }],
                method: RefundMethod::Gateway,
            },
            &admin(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_gateway_failure_aborts_return_refund() {
    let h = harness();
    h.seed_products().await;

    let order_id = h
        .orders
        .create_order(order_request(PaymentMethod::Online), &customer("cust-1"))
        .await
        .unwrap()
        .order
        .id()
        .to_string();
    h.orders
        .verify_online_payment(
            &order_id,
            VerifyPaymentRequest {
                payment_ref: "pay_123".to_string(),
                signature: "sig".to_string(),
            },
            &customer("cust-1"),
        )
        .await
        .unwrap();
    h.deliver_order(&order_id).await;

    let req = mug_return_request(&h, &order_id).await;
    let ret = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap()
        .ret;
    receive_return(&h, &ret, "A1").await;
    h.payments.fail_refunds();

    let item_id = h.store_return(ret.id()).await.items()[0].id.clone();
    let err = h
        .returns
        .process_refund(
            ret.id(),
            ProcessRefundRequest {
                refunds: vec![ItemRefundRequest {
                    item_id,
                    refund_amount: Decimal::new(50, 0),
                }],
                method: RefundMethod::Gateway,
            },
            &admin(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Payment(_)));

    // Money did not move, so nothing was marked refunded.
    let stored = h.store_return(ret.id()).await;
    assert_eq!(stored.status(), ReturnStatus::Received);
    assert_eq!(stored.refunded_amount().amount(), Decimal::ZERO);
}

#[tokio::test]
async fn test_refund_statuses_unreachable_through_update_status() {
    let h = harness();
    h.seed_products().await;
    let order_id = delivered_order(&h).await;
    let req = mug_return_request(&h, &order_id).await;
    let ret = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap()
        .ret;

    let err = h
        .returns
        .update_status(
            ret.id(),
            return_transition(ReturnStatus::Refunded),
            &admin(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_pickup_assignment_requires_agent() {
    let h = harness();
    h.seed_products().await;
    let order_id = delivered_order(&h).await;
    let req = mug_return_request(&h, &order_id).await;
    let ret = h
        .returns
        .create_return_request(req, &customer("cust-1"))
        .await
        .unwrap()
        .ret;

    h.returns
        .update_status(
            ret.id(),
            return_transition(ReturnStatus::Approved),
            &warehouse(),
        )
        .await
        .unwrap();
    let err = h
        .returns
        .update_status(
            ret.id(),
            return_transition(ReturnStatus::PickupAssigned),
            &warehouse(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}
