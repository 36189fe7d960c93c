//! Postgres store
//!
//! Aggregates persist as JSONB documents, one table per collection, with the
//! version held in its own column for the conditional update. The runtime
//! query API is used throughout so the crate builds without a live database.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::domain::aggregates::{Order, Product, Return};
use crate::error::{Result, ServiceError};

use super::{OrderFilter, OrderStore, ProductStore, ReturnFilter, ReturnStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_doc<T: Serialize>(
        &self,
        table: &'static str,
        id: &str,
        doc: &T,
        version: u64,
    ) -> Result<()> {
        let body = to_doc(doc)?;
        let sql = format!(
            "INSERT INTO {} (id, doc, version) VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
            table
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(&body)
            .bind(version as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::conflict(table, id));
        }
        Ok(())
    }

    async fn get_doc<T: DeserializeOwned>(
        &self,
        table: &'static str,
        id: &str,
    ) -> Result<Option<T>> {
        let sql = format!("SELECT doc FROM {} WHERE id = $1", table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| from_doc(r.get::<Value, _>("doc"))).transpose()
    }

    /// Conditional write: `expected` is the version the caller read, the
    /// document already carries `expected + 1`.
    async fn cas_doc<T: Serialize>(
        &self,
        table: &'static str,
        id: &str,
        doc: &T,
        expected: u64,
    ) -> Result<()> {
        let body = to_doc(doc)?;
        let sql = format!(
            "UPDATE {} SET doc = $2, version = $3 WHERE id = $1 AND version = $4",
            table
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(&body)
            .bind((expected + 1) as i64)
            .bind(expected as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        let exists_sql = format!("SELECT 1 FROM {} WHERE id = $1", table);
        let exists = sqlx::query(&exists_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .is_some();
        if exists {
            Err(ServiceError::conflict(table, id))
        } else {
            Err(ServiceError::not_found(table, id))
        }
    }
}

fn to_doc<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ServiceError::Storage(e.to_string()))
}

fn from_doc<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ServiceError::Storage(e.to_string()))
}

fn storage_err(e: sqlx::Error) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

fn page_bounds(page: u64, per_page: u64) -> (i64, i64) {
    let per_page = per_page.clamp(1, 100);
    let offset = (page.max(1) - 1) * per_page;
    (per_page as i64, offset as i64)
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: Order) -> Result<Order> {
        self.insert_doc("orders", order.id(), &order, order.version())
            .await?;
        Ok(order)
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        self.get_doc("orders", id).await
    }

    async fn update_order(&self, mut order: Order) -> Result<Order> {
        let expected = order.version();
        order.bump_version();
        self.cas_doc("orders", order.id(), &order, expected).await?;
        Ok(order)
    }

    async fn list_orders(
        &self,
        filter: OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<Order>> {
        let (limit, offset) = page_bounds(page, per_page);
        let rows = sqlx::query(
            "SELECT doc FROM orders \
             WHERE ($1::text IS NULL OR doc->>'status' = $1) \
               AND ($2::text IS NULL OR doc->'warehouse'->>'id' = $2) \
               AND ($3::text IS NULL OR doc->'customer'->>'id' = $3) \
             ORDER BY created_at DESC LIMIT $4 OFFSET $5",
        )
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.warehouse_id)
        .bind(filter.customer_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<Value, _>("doc")))
            .collect()
    }
}

#[async_trait]
impl ReturnStore for PgStore {
    async fn insert_return(&self, ret: Return) -> Result<Return> {
        self.insert_doc("returns", ret.id(), &ret, ret.version())
            .await?;
        Ok(ret)
    }

    async fn get_return(&self, id: &str) -> Result<Option<Return>> {
        self.get_doc("returns", id).await
    }

    async fn update_return(&self, mut ret: Return) -> Result<Return> {
        let expected = ret.version();
        ret.bump_version();
        self.cas_doc("returns", ret.id(), &ret, expected).await?;
        Ok(ret)
    }

    async fn list_returns(
        &self,
        filter: ReturnFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<Return>> {
        let (limit, offset) = page_bounds(page, per_page);
        let rows = sqlx::query(
            "SELECT doc FROM returns \
             WHERE ($1::text IS NULL OR doc->>'status' = $1) \
               AND ($2::text IS NULL OR doc->>'order_id' = $2) \
               AND ($3::text IS NULL OR doc->>'customer_id' = $3) \
             ORDER BY created_at DESC LIMIT $4 OFFSET $5",
        )
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.order_id)
        .bind(filter.customer_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter()
            .map(|r| from_doc(r.get::<Value, _>("doc")))
            .collect()
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn insert_product(&self, product: Product) -> Result<Product> {
        self.insert_doc("products", product.id(), &product, product.version())
            .await?;
        Ok(product)
    }

    async fn get_product(&self, id: &str) -> Result<Option<Product>> {
        self.get_doc("products", id).await
    }

    async fn update_product(&self, mut product: Product) -> Result<Product> {
        let expected = product.version();
        product.bump_version();
        self.cas_doc("products", product.id(), &product, expected)
            .await?;
        Ok(product)
    }
}
