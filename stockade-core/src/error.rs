//! Error types for Stockade operations

use crate::entities::EntityType;
use thiserror::Error;
use uuid::Uuid;

/// Persistence layer errors.
///
/// Every variant implies the surrounding transaction (if any) has
/// already been rolled back before the error was surfaced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Failed to acquire database connection: {reason}")]
    Pool { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    /// Row-lock acquisition exceeded the configured lock timeout.
    /// Transient: the caller may retry.
    #[error("Timed out waiting for row lock on product {product_id}")]
    LockTimeout { product_id: Uuid },
}

/// Result type alias for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Business-rule validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Price mismatch for product {product_id}: expected {expected}, got {got}")]
    PriceMismatch {
        product_id: Uuid,
        expected: f64,
        got: f64,
    },

    #[error("Quantity must be positive, got {quantity}")]
    NonPositiveQuantity { quantity: i32 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for inventory reservation operations.
///
/// `NotFound`, `Validation` and `InsufficientStock` are business-rule
/// violations: callers translate them to client-facing responses and do
/// not retry. `Store` wraps persistence failures; the transaction has
/// been rolled back by the time one propagates.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InventoryError {
    #[error("{entity_type:?} with id {id} not found")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl InventoryError {
    /// Shorthand for a not-found error.
    pub fn not_found(entity_type: EntityType, id: Uuid) -> Self {
        InventoryError::NotFound { entity_type, id }
    }
}

/// Result type alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = InventoryError::not_found(EntityType::Product, Uuid::nil());
        let msg = format!("{}", err);
        assert!(msg.contains("Product"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_insufficient_stock_display() {
        let err = InventoryError::InsufficientStock {
            product_id: Uuid::nil(),
            requested: 5,
            available: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("requested 5"));
        assert!(msg.contains("available 2"));
    }

    #[test]
    fn test_price_mismatch_display() {
        let err = ValidationError::PriceMismatch {
            product_id: Uuid::nil(),
            expected: 10.0,
            got: 1.0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Price mismatch"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_store_error_converts_to_inventory_error() {
        let err: InventoryError = StoreError::Query {
            reason: "connection reset".to_string(),
        }
        .into();
        assert!(matches!(err, InventoryError::Store(_)));
    }
}
