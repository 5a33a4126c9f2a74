//! Stockade Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types and the error taxonomy - no
//! business logic and no I/O.

pub mod entities;
pub mod error;
pub mod identity;

pub use entities::{
    EntityType, LineItem, LineItemUpdate, NewLineItem, Order, Product, PRICE_EPSILON,
};
pub use error::{InventoryError, InventoryResult, StoreError, StoreResult, ValidationError};
pub use identity::{new_entity_id, EntityId, Timestamp};
