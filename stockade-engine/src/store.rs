//! Persistence seam for the reservation engine.
//!
//! The engine is written against these two traits so the same
//! reservation logic runs over PostgreSQL in production and over an
//! in-memory store in tests. The contract that matters:
//! `product_for_update` must grant an exclusive per-row lock that is
//! held until the transaction commits or rolls back, and commits must
//! apply all buffered writes atomically.

use async_trait::async_trait;
use stockade_core::{EntityId, LineItem, Order, Product, StoreResult};

/// Pool-level reads plus transaction entry.
///
/// Reads outside a transaction see committed state only; they are used
/// for pre-image loads and validation, never for stock arithmetic.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn order_get(&self, id: EntityId) -> StoreResult<Option<Order>>;

    async fn product_get(&self, id: EntityId) -> StoreResult<Option<Product>>;

    /// Page of products ordered by id.
    async fn product_list(&self, skip: i64, limit: i64) -> StoreResult<Vec<Product>>;

    async fn line_item_get(&self, id: EntityId) -> StoreResult<Option<LineItem>>;

    async fn line_items_for_order(&self, order_id: EntityId) -> StoreResult<Vec<LineItem>>;

    /// Open a transaction. The caller must finish it with `commit` or
    /// `rollback`; every engine operation does so on all paths.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// An open transaction holding zero or more product row locks.
///
/// When two products must be locked in one transaction, callers lock
/// them in ascending `product_id` order so concurrent transactions
/// cannot deadlock against each other.
#[async_trait]
pub trait StoreTx: Send {
    /// Read a product under its exclusive row lock. The lock is held
    /// for the remainder of the transaction.
    async fn product_for_update(&mut self, id: EntityId) -> StoreResult<Option<Product>>;

    /// Write a product's stock counter. Only called on rows this
    /// transaction has already locked.
    async fn set_product_stock(&mut self, id: EntityId, stock: i32) -> StoreResult<()>;

    async fn insert_line_item(&mut self, item: &LineItem) -> StoreResult<()>;

    /// Overwrite a line item. Returns `false` if the row no longer
    /// exists (lost a race with a release).
    async fn update_line_item(&mut self, item: &LineItem) -> StoreResult<bool>;

    /// Delete a line item. Returns `false` if the row no longer exists.
    async fn delete_line_item(&mut self, id: EntityId) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
