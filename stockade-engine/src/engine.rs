//! Atomic inventory reservation.
//!
//! Every stock mutation follows the same protocol: load pre-images and
//! validate business rules outside the transaction, then open a
//! transaction, take the product's exclusive row lock, re-read stock
//! under the lock, and apply the line-item write plus the stock write
//! together. Stock arithmetic only ever uses the locked re-read, so two
//! concurrent reservations cannot both spend the same units.

use std::sync::Arc;

use chrono::Utc;
use stockade_core::{
    new_entity_id, EntityId, EntityType, InventoryError, InventoryResult, LineItem,
    LineItemUpdate, NewLineItem, Product, ValidationError, PRICE_EPSILON,
};

use crate::store::{ReservationStore, StoreTx};

/// Reservation engine over a pluggable store.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Fetch a line item.
    pub async fn line_item(&self, id: EntityId) -> InventoryResult<LineItem> {
        self.store
            .line_item_get(id)
            .await?
            .ok_or_else(|| InventoryError::not_found(EntityType::LineItem, id))
    }

    /// Fetch all line items of an order, verifying the order exists.
    pub async fn line_items_for_order(&self, order_id: EntityId) -> InventoryResult<Vec<LineItem>> {
        self.store
            .order_get(order_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(EntityType::Order, order_id))?;
        Ok(self.store.line_items_for_order(order_id).await?)
    }

    /// Reserve stock: create a line item and decrement the product's
    /// stock in one transaction.
    pub async fn reserve(&self, new: NewLineItem) -> InventoryResult<LineItem> {
        if new.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity {
                quantity: new.quantity,
            }
            .into());
        }

        let order = self
            .store
            .order_get(new.order_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(EntityType::Order, new.order_id))?;
        // Fast-path existence check; price and stock come from the
        // locked re-read below.
        self.store
            .product_get(new.product_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(EntityType::Product, new.product_id))?;

        let mut tx = self.store.begin().await?;
        let result = async {
            let locked = tx
                .product_for_update(new.product_id)
                .await?
                .ok_or_else(|| InventoryError::not_found(EntityType::Product, new.product_id))?;
            // Price defaulting and the epsilon guard run against the
            // locked row, so a price change committed after the
            // pre-read cannot slip past the guard.
            let unit_price = effective_price(&locked, new.unit_price)?;
            if locked.stock < new.quantity {
                return Err(InventoryError::InsufficientStock {
                    product_id: new.product_id,
                    requested: new.quantity,
                    available: locked.stock,
                });
            }
            tx.set_product_stock(new.product_id, locked.stock - new.quantity)
                .await?;

            let now = Utc::now();
            let item = LineItem {
                line_item_id: new_entity_id(),
                order_id: order.order_id,
                product_id: new.product_id,
                quantity: new.quantity,
                unit_price,
                created_at: now,
                updated_at: now,
            };
            tx.insert_line_item(&item).await?;
            Ok(item)
        }
        .await;

        let item = finish(tx, result).await?;
        tracing::info!(
            line_item_id = %item.line_item_id,
            order_id = %item.order_id,
            product_id = %item.product_id,
            quantity = item.quantity,
            "reserved stock"
        );
        Ok(item)
    }

    /// Adjust a line item, reconciling the stock delta with the owning
    /// product. Changing the product releases the full quantity back to
    /// the old product and reserves the new quantity from the new one.
    pub async fn adjust(
        &self,
        line_item_id: EntityId,
        update: LineItemUpdate,
    ) -> InventoryResult<LineItem> {
        let current = self.line_item(line_item_id).await?;
        if update.is_empty() {
            return Ok(current);
        }

        if let Some(quantity) = update.quantity {
            if quantity <= 0 {
                return Err(ValidationError::NonPositiveQuantity { quantity }.into());
            }
        }

        let target_order_id = update.order_id.unwrap_or(current.order_id);
        if target_order_id != current.order_id {
            self.store
                .order_get(target_order_id)
                .await?
                .ok_or_else(|| InventoryError::not_found(EntityType::Order, target_order_id))?;
        }

        let target_product_id = update.product_id.unwrap_or(current.product_id);
        // Fast-path existence check; price resolution happens against
        // the locked row inside the transaction.
        self.store
            .product_get(target_product_id)
            .await?
            .ok_or_else(|| InventoryError::not_found(EntityType::Product, target_product_id))?;

        let new_quantity = update.quantity.unwrap_or(current.quantity);

        let mut tx = self.store.begin().await?;
        let result = async {
            let unit_price = if target_product_id == current.product_id {
                let locked = tx
                    .product_for_update(target_product_id)
                    .await?
                    .ok_or_else(|| {
                        InventoryError::not_found(EntityType::Product, target_product_id)
                    })?;
                let unit_price = adjusted_price(&locked, &current, update.unit_price)?;
                let delta = new_quantity - current.quantity;
                if delta > 0 && locked.stock < delta {
                    return Err(InventoryError::InsufficientStock {
                        product_id: target_product_id,
                        requested: delta,
                        available: locked.stock,
                    });
                }
                if delta != 0 {
                    tx.set_product_stock(target_product_id, locked.stock - delta)
                        .await?;
                }
                unit_price
            } else {
                // Two rows to lock; always in ascending id order so
                // concurrent switches cannot deadlock.
                let old_id = current.product_id;
                let new_id = target_product_id;
                let (old_row, new_row) = if old_id < new_id {
                    let old = tx.product_for_update(old_id).await?;
                    let new = tx.product_for_update(new_id).await?;
                    (old, new)
                } else {
                    let new = tx.product_for_update(new_id).await?;
                    let old = tx.product_for_update(old_id).await?;
                    (old, new)
                };
                let old_row = old_row
                    .ok_or_else(|| InventoryError::not_found(EntityType::Product, old_id))?;
                let new_row = new_row
                    .ok_or_else(|| InventoryError::not_found(EntityType::Product, new_id))?;
                let unit_price = adjusted_price(&new_row, &current, update.unit_price)?;

                if new_row.stock < new_quantity {
                    return Err(InventoryError::InsufficientStock {
                        product_id: new_id,
                        requested: new_quantity,
                        available: new_row.stock,
                    });
                }

                tx.set_product_stock(old_id, old_row.stock + current.quantity)
                    .await?;
                tx.set_product_stock(new_id, new_row.stock - new_quantity)
                    .await?;
                unit_price
            };

            let updated = LineItem {
                line_item_id,
                order_id: target_order_id,
                product_id: target_product_id,
                quantity: new_quantity,
                unit_price,
                created_at: current.created_at,
                updated_at: Utc::now(),
            };
            if !tx.update_line_item(&updated).await? {
                // Lost a race with a concurrent release.
                return Err(InventoryError::not_found(EntityType::LineItem, line_item_id));
            }
            Ok(updated)
        }
        .await;

        let item = finish(tx, result).await?;
        tracing::info!(
            line_item_id = %item.line_item_id,
            product_id = %item.product_id,
            quantity = item.quantity,
            "adjusted reservation"
        );
        Ok(item)
    }

    /// Release a reservation: delete the line item and return its
    /// quantity to the product's stock in one transaction. Returns the
    /// deleted line item.
    pub async fn release(&self, line_item_id: EntityId) -> InventoryResult<LineItem> {
        let current = self.line_item(line_item_id).await?;

        let mut tx = self.store.begin().await?;
        let result = async {
            // The restock must land somewhere; a missing product row
            // aborts the release with the line item intact.
            let product = tx
                .product_for_update(current.product_id)
                .await?
                .ok_or_else(|| {
                    InventoryError::not_found(EntityType::Product, current.product_id)
                })?;
            tx.set_product_stock(current.product_id, product.stock + current.quantity)
                .await?;
            if !tx.delete_line_item(line_item_id).await? {
                return Err(InventoryError::not_found(EntityType::LineItem, line_item_id));
            }
            Ok(current.clone())
        }
        .await;

        let item = finish(tx, result).await?;
        tracing::info!(
            line_item_id = %item.line_item_id,
            product_id = %item.product_id,
            quantity = item.quantity,
            "released reservation"
        );
        Ok(item)
    }
}

/// Commit on success, roll back on failure. Rollback failures are
/// logged and the business error wins.
async fn finish<T>(tx: Box<dyn StoreTx>, result: InventoryResult<T>) -> InventoryResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after aborted transaction");
            }
            Err(err)
        }
    }
}

/// Resolve the price to capture on a line item, rejecting requests more
/// than `PRICE_EPSILON` away from the product's current price.
fn effective_price(product: &Product, requested: Option<f64>) -> Result<f64, ValidationError> {
    match requested {
        Some(price) if (price - product.price).abs() > PRICE_EPSILON => {
            Err(ValidationError::PriceMismatch {
                product_id: product.product_id,
                expected: product.price,
                got: price,
            })
        }
        Some(price) => Ok(price),
        None => Ok(product.price),
    }
}

/// Price resolution for an adjust, given the locked target product.
/// An explicit price is epsilon-checked against it; switching products
/// without a price re-captures the target's current price; otherwise
/// the captured price is kept.
fn adjusted_price(
    target: &Product,
    current: &LineItem,
    requested: Option<f64>,
) -> Result<f64, ValidationError> {
    match requested {
        Some(price) => effective_price(target, Some(price)),
        None if target.product_id != current.product_id => Ok(target.price),
        None => Ok(current.unit_price),
    }
}
