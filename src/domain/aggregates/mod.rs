//! Aggregates module

pub mod order;
pub mod product;
pub mod return_request;

pub use order::{
    derive_payment_status, AgentAssignment, CancellationInfo, CustomerInfo, Order, OrderError,
    OrderItem, OrderStatus, OtpIssuance, PaymentInfo, PaymentMethod, PaymentStatus,
    PricingBreakdown, StatusHistoryEntry, TrackingInfo, WarehouseInfo,
};
pub use product::{Product, ProductError, VariantStock};
pub use return_request::{
    ItemReturnStatus, PickupInfo, RefundInfo, RefundMethod, Return, ReturnError, ReturnItem,
    ReturnStatus,
};
