//! Entity types owned by the inventory reservation engine.
//!
//! Pure data structures with no behavior. Mutations flow through the
//! explicit update DTOs (`NewLineItem`, `LineItemUpdate`) so that only
//! the fields the engine is allowed to change are expressible at all.

use crate::identity::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// Tolerance for the price-manipulation guard: a reservation whose unit
/// price differs from the product's current price by more than this
/// amount is rejected.
pub const PRICE_EPSILON: f64 = 0.01;

// ============================================================================
// ENTITY TYPE TAG
// ============================================================================

/// Entity kinds handled by the engine, used in errors and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Product,
    Order,
    LineItem,
}

impl EntityType {
    /// Stable lowercase name, used as a cache key prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Product => "product",
            EntityType::Order => "order",
            EntityType::LineItem => "line_item",
        }
    }
}

// ============================================================================
// PRODUCT
// ============================================================================

/// A product with a shared stock counter.
///
/// `stock` is the single most contended field in the system: it is
/// mutated only inside a transaction holding the product's exclusive
/// row lock, and must never go negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: EntityId,
    pub name: String,
    /// Current unit price. Reservations must match it within `PRICE_EPSILON`.
    pub price: f64,
    /// Units currently available. Invariant: `stock >= 0`.
    pub stock: i32,
    pub category_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// ORDER
// ============================================================================

/// An order header. The engine only ever checks orders for existence;
/// their own lifecycle is managed elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: EntityId,
    pub created_at: Timestamp,
}

// ============================================================================
// LINE ITEM
// ============================================================================

/// One product-quantity-price association within an order.
///
/// Lifecycle: `absent -> reserved -> {adjusted}* -> released(absent)`.
/// Every transition mutates the owning product's stock inside the same
/// transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_item_id: EntityId,
    pub order_id: EntityId,
    pub product_id: EntityId,
    /// Units reserved. Invariant: `quantity > 0`.
    pub quantity: i32,
    /// Price captured at reservation time, guarded against the product's
    /// current price within `PRICE_EPSILON`.
    pub unit_price: f64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Insert payload for a line item. The id and timestamps are assigned by
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub order_id: EntityId,
    pub product_id: EntityId,
    pub quantity: i32,
    /// Price the caller expects to pay. `None` captures the product's
    /// current price; `Some` is validated against it within
    /// `PRICE_EPSILON`.
    pub unit_price: Option<f64>,
}

/// Update payload for a line item.
///
/// Only the fields that are actually mutable appear here; anything else
/// cannot be expressed, which replaces the runtime field allow-listing
/// of the original service with a compile-time check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItemUpdate {
    pub order_id: Option<EntityId>,
    pub product_id: Option<EntityId>,
    pub quantity: Option<i32>,
    pub unit_price: Option<f64>,
}

impl LineItemUpdate {
    /// True when the update carries no field changes at all.
    pub fn is_empty(&self) -> bool {
        self.order_id.is_none()
            && self.product_id.is_none()
            && self.quantity.is_none()
            && self.unit_price.is_none()
    }

    /// Quantity update builder, the common case.
    pub fn quantity(quantity: i32) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::default()
        }
    }
}
