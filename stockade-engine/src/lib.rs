//! Stockade Engine - Atomic Inventory Reservation
//!
//! Reserve, adjust, and release stock against shared product rows
//! without overselling. All stock arithmetic happens under an exclusive
//! per-product row lock inside a transaction; pre-image loads and
//! validation run outside it to keep lock hold times short.
//!
//! Two store backends: [`PgStore`] (PostgreSQL, `SELECT ... FOR UPDATE`)
//! and [`MemoryStore`] (async-mutex row locks, used in tests). The
//! [`CachedCatalog`] adds stampede-safe cached product reads on top of
//! either.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod memory;
pub mod pg;
pub mod store;

pub use catalog::CachedCatalog;
pub use config::DbConfig;
pub use engine::ReservationEngine;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{ReservationStore, StoreTx};
