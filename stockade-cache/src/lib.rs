//! Stockade Cache - Stampede-Safe Read-Through Caching
//!
//! A typed cache front-end over a pluggable key-value store. On a cache
//! miss, a per-key lock in the same store ensures only one caller runs
//! the expensive computation while the rest poll for its result. Store
//! failures never propagate: the cache degrades to direct computation.
//!
//! Two backends ship with the crate: [`MemoryKvStore`] for tests and
//! single-worker deployments, and [`LmdbKvStore`] for sharing one cache
//! across worker processes on a host.

pub mod key;
pub mod lmdb;
pub mod memory;
pub mod stampede;
pub mod store;

pub use key::CacheKey;
pub use lmdb::LmdbKvStore;
pub use memory::MemoryKvStore;
pub use stampede::{CacheConfig, StampedeCache};
pub use store::{KvError, KvResult, KvStore};
