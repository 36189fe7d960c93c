//! Persistence traits
//!
//! Aggregates are stored as whole documents. Every mutation goes through a
//! compare-and-swap `update_*` keyed on the aggregate's version; a lost race
//! surfaces as `ServiceError::Conflict` and the caller retries or gives up.
//! Two implementations: [`memory::InMemoryStore`] (tests, default runtime)
//! and [`postgres::PgStore`] (JSONB documents).

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::aggregates::{Order, OrderStatus, Product, Return, ReturnStatus};
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub warehouse_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ReturnFilter {
    pub status: Option<ReturnStatus>,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<Order>;
    async fn get_order(&self, id: &str) -> Result<Option<Order>>;
    /// Compare-and-swap on `order.version()`; bumps the version on success.
    async fn update_order(&self, order: Order) -> Result<Order>;
    async fn list_orders(&self, filter: OrderFilter, page: u64, per_page: u64)
        -> Result<Vec<Order>>;
}

#[async_trait]
pub trait ReturnStore: Send + Sync {
    async fn insert_return(&self, ret: Return) -> Result<Return>;
    async fn get_return(&self, id: &str) -> Result<Option<Return>>;
    async fn update_return(&self, ret: Return) -> Result<Return>;
    async fn list_returns(
        &self,
        filter: ReturnFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<Return>>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert_product(&self, product: Product) -> Result<Product>;
    async fn get_product(&self, id: &str) -> Result<Option<Product>>;
    async fn update_product(&self, product: Product) -> Result<Product>;
}
