//! In-memory store
//!
//! Backs the test suite and runs the service without a database. The version
//! check mimics the conditional update the Postgres store performs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::aggregates::{Order, Product, Return};
use crate::error::{Result, ServiceError};

use super::{OrderFilter, OrderStore, ProductStore, ReturnFilter, ReturnStore};

#[derive(Default)]
pub struct InMemoryStore {
    orders: RwLock<HashMap<String, Order>>,
    returns: RwLock<HashMap<String, Return>>,
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(mut items: Vec<T>, page: u64, per_page: u64) -> Vec<T> {
    let per_page = per_page.clamp(1, 100) as usize;
    let start = (page.max(1) as usize - 1) * per_page;
    if start >= items.len() {
        return Vec::new();
    }
    items.drain(..start);
    items.truncate(per_page);
    items
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(order.id()) {
            return Err(ServiceError::conflict("order", order.id()));
        }
        orders.insert(order.id().to_string(), order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn update_order(&self, mut order: Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get(order.id())
            .ok_or_else(|| ServiceError::not_found("order", order.id()))?;
        if stored.version() != order.version() {
            return Err(ServiceError::conflict("order", order.id()));
        }
        order.bump_version();
        orders.insert(order.id().to_string(), order.clone());
        Ok(order)
    }

    async fn list_orders(
        &self,
        filter: OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matched: Vec<Order> = orders
            .values()
            .filter(|o| filter.status.map_or(true, |s| o.status() == s))
            .filter(|o| {
                filter
                    .warehouse_id
                    .as_deref()
                    .map_or(true, |w| o.warehouse().id == w)
            })
            .filter(|o| {
                filter
                    .customer_id
                    .as_deref()
                    .map_or(true, |c| o.customer().id == c)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(paginate(matched, page, per_page))
    }
}

#[async_trait]
impl ReturnStore for InMemoryStore {
    async fn insert_return(&self, ret: Return) -> Result<Return> {
        let mut returns = self.returns.write().await;
        if returns.contains_key(ret.id()) {
            return Err(ServiceError::conflict("return", ret.id()));
        }
        returns.insert(ret.id().to_string(), ret.clone());
        Ok(ret)
    }

    async fn get_return(&self, id: &str) -> Result<Option<Return>> {
        Ok(self.returns.read().await.get(id).cloned())
    }

    async fn update_return(&self, mut ret: Return) -> Result<Return> {
        let mut returns = self.returns.write().await;
        let stored = returns
            .get(ret.id())
            .ok_or_else(|| ServiceError::not_found("return", ret.id()))?;
        if stored.version() != ret.version() {
            return Err(ServiceError::conflict("return", ret.id()));
        }
        ret.bump_version();
        returns.insert(ret.id().to_string(), ret.clone());
        Ok(ret)
    }

    async fn list_returns(
        &self,
        filter: ReturnFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<Return>> {
        let returns = self.returns.read().await;
        let mut matched: Vec<Return> = returns
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status() == s))
            .filter(|r| {
                filter
                    .order_id
                    .as_deref()
                    .map_or(true, |o| r.order_id() == o)
            })
            .filter(|r| {
                filter
                    .customer_id
                    .as_deref()
                    .map_or(true, |c| r.customer_id() == c)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(paginate(matched, page, per_page))
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn insert_product(&self, product: Product) -> Result<Product> {
        let mut products = self.products.write().await;
        if products.contains_key(product.id()) {
            return Err(ServiceError::conflict("product", product.id()));
        }
        products.insert(product.id().to_string(), product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: &str) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn update_product(&self, mut product: Product) -> Result<Product> {
        let mut products = self.products.write().await;
        let stored = products
            .get(product.id())
            .ok_or_else(|| ServiceError::not_found("product", product.id()))?;
        if stored.version() != product.version() {
            return Err(ServiceError::conflict("product", product.id()));
        }
        product.bump_version();
        products.insert(product.id().to_string(), product.clone());
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::Product;

    #[tokio::test]
    async fn test_product_cas_rejects_stale_writer() {
        let store = InMemoryStore::new();
        let p = store
            .insert_product(Product::new("P1", "Widget", 5))
            .await
            .unwrap();

        // Two readers pick up version 0; only the first write lands.
        let mut first = p.clone();
        let mut second = p;
        first.adjust_stock(None, -1).unwrap();
        second.adjust_stock(None, -2).unwrap();

        let written = store.update_product(first).await.unwrap();
        assert_eq!(written.version(), 1);
        let err = store.update_product(second).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));
    }

    #[test]
    fn test_paginate_bounds() {
        let items: Vec<u32> = (0..5).collect();
        assert_eq!(paginate(items.clone(), 1, 2), vec![0, 1]);
        assert_eq!(paginate(items.clone(), 3, 2), vec![4]);
        assert!(paginate(items, 4, 2).is_empty());
    }
}
