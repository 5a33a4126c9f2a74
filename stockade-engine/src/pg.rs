//! PostgreSQL-backed reservation store.
//!
//! Row locks come from `SELECT ... FOR UPDATE`; the per-transaction
//! `SET LOCAL lock_timeout` turns an unbounded wait on a contended
//! product row into a typed `StoreError::LockTimeout` the caller can
//! retry. The oversell invariant is additionally enforced in the schema
//! (`CHECK (stock >= 0)`, see `schema.sql`) as a last line of defense.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use std::time::Duration;
use stockade_core::{EntityId, LineItem, Order, Product, StoreError, StoreResult};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;

use crate::config::DbConfig;
use crate::store::{ReservationStore, StoreTx};

const PRODUCT_COLUMNS: &str =
    "product_id, name, price, stock, category_id, created_at, updated_at";
const LINE_ITEM_COLUMNS: &str =
    "line_item_id, order_id, product_id, quantity, unit_price, created_at, updated_at";

/// PostgreSQL implementation of [`ReservationStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: Pool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn from_config(config: &DbConfig) -> StoreResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool, config.lock_timeout))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> StoreResult<Object> {
        self.pool.get().await.map_err(|e| StoreError::Pool {
            reason: e.to_string(),
        })
    }
}

fn query_err(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query {
        reason: e.to_string(),
    }
}

fn product_from_row(row: &Row) -> StoreResult<Product> {
    Ok(Product {
        product_id: row.try_get("product_id").map_err(query_err)?,
        name: row.try_get("name").map_err(query_err)?,
        price: row.try_get("price").map_err(query_err)?,
        stock: row.try_get("stock").map_err(query_err)?,
        category_id: row.try_get("category_id").map_err(query_err)?,
        created_at: row.try_get("created_at").map_err(query_err)?,
        updated_at: row.try_get("updated_at").map_err(query_err)?,
    })
}

fn line_item_from_row(row: &Row) -> StoreResult<LineItem> {
    Ok(LineItem {
        line_item_id: row.try_get("line_item_id").map_err(query_err)?,
        order_id: row.try_get("order_id").map_err(query_err)?,
        product_id: row.try_get("product_id").map_err(query_err)?,
        quantity: row.try_get("quantity").map_err(query_err)?,
        unit_price: row.try_get("unit_price").map_err(query_err)?,
        created_at: row.try_get("created_at").map_err(query_err)?,
        updated_at: row.try_get("updated_at").map_err(query_err)?,
    })
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn order_get(&self, id: EntityId) -> StoreResult<Option<Order>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT order_id, created_at FROM orders WHERE order_id = $1",
                &[&id],
            )
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(Order {
                order_id: row.try_get("order_id").map_err(query_err)?,
                created_at: row.try_get("created_at").map_err(query_err)?,
            })),
            None => Ok(None),
        }
    }

    async fn product_get(&self, id: EntityId) -> StoreResult<Option<Product>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = $1").as_str(),
                &[&id],
            )
            .await
            .map_err(query_err)?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn product_list(&self, skip: i64, limit: i64) -> StoreResult<Vec<Product>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products \
                     ORDER BY product_id OFFSET $1 LIMIT $2"
                )
                .as_str(),
                &[&skip, &limit],
            )
            .await
            .map_err(query_err)?;

        rows.iter().map(product_from_row).collect()
    }

    async fn line_item_get(&self, id: EntityId) -> StoreResult<Option<LineItem>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                format!("SELECT {LINE_ITEM_COLUMNS} FROM line_items WHERE line_item_id = $1")
                    .as_str(),
                &[&id],
            )
            .await
            .map_err(query_err)?;

        row.as_ref().map(line_item_from_row).transpose()
    }

    async fn line_items_for_order(&self, order_id: EntityId) -> StoreResult<Vec<LineItem>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                format!(
                    "SELECT {LINE_ITEM_COLUMNS} FROM line_items \
                     WHERE order_id = $1 ORDER BY line_item_id"
                )
                .as_str(),
                &[&order_id],
            )
            .await
            .map_err(query_err)?;

        rows.iter().map(line_item_from_row).collect()
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let conn = self.get_conn().await?;
        conn.batch_execute(&format!(
            "BEGIN; SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .await
        .map_err(|e| StoreError::TransactionFailed {
            reason: e.to_string(),
        })?;

        Ok(Box::new(PgTx { conn }))
    }
}

/// One open PostgreSQL transaction.
///
/// The connection is checked out of the pool for the transaction's
/// lifetime. Callers must reach `commit` or `rollback` on every path;
/// the engine guarantees this.
struct PgTx {
    conn: Object,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn product_for_update(&mut self, id: EntityId) -> StoreResult<Option<Product>> {
        let row = self
            .conn
            .query_opt(
                format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products \
                     WHERE product_id = $1 FOR UPDATE"
                )
                .as_str(),
                &[&id],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) {
                    StoreError::LockTimeout { product_id: id }
                } else {
                    query_err(e)
                }
            })?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn set_product_stock(&mut self, id: EntityId, stock: i32) -> StoreResult<()> {
        self.conn
            .execute(
                "UPDATE products SET stock = $2, updated_at = now() WHERE product_id = $1",
                &[&id, &stock],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO line_items \
                 (line_item_id, order_id, product_id, quantity, unit_price, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &item.line_item_id,
                    &item.order_id,
                    &item.product_id,
                    &item.quantity,
                    &item.unit_price,
                    &item.created_at,
                    &item.updated_at,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn update_line_item(&mut self, item: &LineItem) -> StoreResult<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE line_items SET order_id = $2, product_id = $3, quantity = $4, \
                 unit_price = $5, updated_at = $6 WHERE line_item_id = $1",
                &[
                    &item.line_item_id,
                    &item.order_id,
                    &item.product_id,
                    &item.quantity,
                    &item.unit_price,
                    &item.updated_at,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn delete_line_item(&mut self, id: EntityId) -> StoreResult<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM line_items WHERE line_item_id = $1", &[&id])
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .batch_execute("COMMIT")
            .await
            .map_err(|e| StoreError::TransactionFailed {
                reason: e.to_string(),
            })
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| StoreError::TransactionFailed {
                reason: e.to_string(),
            })
    }
}
