//! In-memory reservation store.
//!
//! Test double and lightweight backend that reproduces the concurrency
//! semantics the engine depends on: `product_for_update` takes a
//! per-product async mutex held until the transaction finishes, writes
//! are buffered and applied atomically at commit, and a waiter granted
//! the row lock observes the committed stock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use stockade_core::{EntityId, LineItem, Order, Product, StoreError, StoreResult};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::store::{ReservationStore, StoreTx};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<EntityId, Order>,
    products: HashMap<EntityId, Product>,
    line_items: HashMap<EntityId, LineItem>,
}

/// In-memory implementation of [`ReservationStore`].
///
/// Clones share the same underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    row_locks: Arc<Mutex<HashMap<EntityId, Arc<RowLock<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order row.
    pub fn insert_order(&self, order: Order) {
        self.lock_tables().orders.insert(order.order_id, order);
    }

    /// Insert or replace a product row.
    pub fn insert_product(&self, product: Product) {
        self.lock_tables()
            .products
            .insert(product.product_id, product);
    }

    /// Remove a product row, returning it if present.
    pub fn remove_product(&self, id: EntityId) -> Option<Product> {
        self.lock_tables().products.remove(&id)
    }

    /// Number of line item rows, for test assertions.
    pub fn line_item_count(&self) -> usize {
        self.lock_tables().line_items.len()
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_lock(&self, id: EntityId) -> Arc<RowLock<()>> {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id).or_default())
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn order_get(&self, id: EntityId) -> StoreResult<Option<Order>> {
        Ok(self.lock_tables().orders.get(&id).cloned())
    }

    async fn product_get(&self, id: EntityId) -> StoreResult<Option<Product>> {
        Ok(self.lock_tables().products.get(&id).cloned())
    }

    async fn product_list(&self, skip: i64, limit: i64) -> StoreResult<Vec<Product>> {
        let tables = self.lock_tables();
        let mut products: Vec<Product> = tables.products.values().cloned().collect();
        products.sort_by_key(|p| p.product_id);
        Ok(products
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn line_item_get(&self, id: EntityId) -> StoreResult<Option<LineItem>> {
        Ok(self.lock_tables().line_items.get(&id).cloned())
    }

    async fn line_items_for_order(&self, order_id: EntityId) -> StoreResult<Vec<LineItem>> {
        let tables = self.lock_tables();
        let mut items: Vec<LineItem> = tables
            .line_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.line_item_id);
        Ok(items)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            guards: HashMap::new(),
            pending: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    SetStock { product_id: EntityId, stock: i32 },
    InsertLineItem(LineItem),
    UpdateLineItem(LineItem),
    DeleteLineItem(EntityId),
}

struct MemoryTx {
    store: MemoryStore,
    guards: HashMap<EntityId, OwnedMutexGuard<()>>,
    pending: Vec<Mutation>,
}

impl MemoryTx {
    /// Committed line-item presence adjusted for this transaction's
    /// buffered writes.
    fn line_item_exists(&self, id: EntityId) -> bool {
        let mut exists = self.store.lock_tables().line_items.contains_key(&id);
        for mutation in &self.pending {
            match mutation {
                Mutation::InsertLineItem(item) if item.line_item_id == id => exists = true,
                Mutation::DeleteLineItem(deleted) if *deleted == id => exists = false,
                _ => {}
            }
        }
        exists
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn product_for_update(&mut self, id: EntityId) -> StoreResult<Option<Product>> {
        if !self.guards.contains_key(&id) {
            let lock = self.store.row_lock(id);
            let guard = lock.lock_owned().await;
            self.guards.insert(id, guard);
        }

        let mut product = self.store.lock_tables().products.get(&id).cloned();
        if let Some(product) = product.as_mut() {
            for mutation in &self.pending {
                if let Mutation::SetStock { product_id, stock } = mutation {
                    if *product_id == id {
                        product.stock = *stock;
                    }
                }
            }
        }
        Ok(product)
    }

    async fn set_product_stock(&mut self, id: EntityId, stock: i32) -> StoreResult<()> {
        self.pending.push(Mutation::SetStock {
            product_id: id,
            stock,
        });
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> StoreResult<()> {
        self.pending.push(Mutation::InsertLineItem(item.clone()));
        Ok(())
    }

    async fn update_line_item(&mut self, item: &LineItem) -> StoreResult<bool> {
        if !self.line_item_exists(item.line_item_id) {
            return Ok(false);
        }
        self.pending.push(Mutation::UpdateLineItem(item.clone()));
        Ok(true)
    }

    async fn delete_line_item(&mut self, id: EntityId) -> StoreResult<bool> {
        if !self.line_item_exists(id) {
            return Ok(false);
        }
        self.pending.push(Mutation::DeleteLineItem(id));
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        // Mirrors the schema's CHECK (stock >= 0): reject the whole
        // transaction rather than commit negative stock.
        for mutation in &self.pending {
            if let Mutation::SetStock { product_id, stock } = mutation {
                if *stock < 0 {
                    return Err(StoreError::TransactionFailed {
                        reason: format!(
                            "stock check violated for product {product_id}: {stock}"
                        ),
                    });
                }
            }
        }

        let mut tables = self.store.lock_tables();
        let now = Utc::now();
        for mutation in self.pending {
            match mutation {
                Mutation::SetStock { product_id, stock } => {
                    if let Some(product) = tables.products.get_mut(&product_id) {
                        product.stock = stock;
                        product.updated_at = now;
                    }
                }
                Mutation::InsertLineItem(item) => {
                    tables.line_items.insert(item.line_item_id, item);
                }
                Mutation::UpdateLineItem(item) => {
                    tables.line_items.insert(item.line_item_id, item);
                }
                Mutation::DeleteLineItem(id) => {
                    tables.line_items.remove(&id);
                }
            }
        }
        drop(tables);
        // Row lock guards drop here, after the writes are visible.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        // Buffered mutations and row locks are simply dropped.
        Ok(())
    }
}
