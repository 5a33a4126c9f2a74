//! Cached product catalog reads.
//!
//! Product detail and listing reads go through the stampede-safe cache;
//! anything that changes a product's visible fields calls
//! `invalidate_product`, which drops the detail key and every listing
//! page in one pass. Stock levels are deliberately served from these
//! cached snapshots too: the authoritative stock check always happens
//! under the row lock inside the engine, so a stale cached count can
//! never cause an oversell.

use std::sync::Arc;

use stockade_cache::{CacheKey, KvStore, StampedeCache};
use stockade_core::{EntityId, EntityType, InventoryError, InventoryResult, Product};

use crate::store::ReservationStore;

const PRODUCT_PREFIX: &str = "products";

/// Read-through product catalog.
pub struct CachedCatalog<S: KvStore> {
    store: Arc<dyn ReservationStore>,
    cache: StampedeCache<S>,
}

impl<S: KvStore> Clone for CachedCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
        }
    }
}

fn product_key(id: EntityId) -> String {
    CacheKey::new(PRODUCT_PREFIX).segment("id").segment(id).build()
}

fn list_key(skip: i64, limit: i64) -> String {
    CacheKey::new(PRODUCT_PREFIX)
        .segment("list")
        .param("skip", skip)
        .param("limit", limit)
        .build()
}

impl<S: KvStore> CachedCatalog<S> {
    pub fn new(store: Arc<dyn ReservationStore>, cache: StampedeCache<S>) -> Self {
        Self { store, cache }
    }

    /// Fetch one product, cache-first. Misses are computed under the
    /// stampede lock and backfilled; a missing product is never cached.
    pub async fn product(&self, id: EntityId) -> InventoryResult<Product> {
        self.cache
            .get_or_compute(&product_key(id), None, || async {
                self.store
                    .product_get(id)
                    .await?
                    .ok_or_else(|| InventoryError::not_found(EntityType::Product, id))
            })
            .await
    }

    /// Fetch a page of products, cache-first. Each (skip, limit) pair is
    /// its own cache entry.
    pub async fn products(&self, skip: i64, limit: i64) -> InventoryResult<Vec<Product>> {
        self.cache
            .get_or_compute(&list_key(skip, limit), None, || async {
                Ok(self.store.product_list(skip, limit).await?)
            })
            .await
    }

    /// Drop the product's detail entry and every cached listing page.
    /// Call after any write that changes product fields served from
    /// cache.
    pub async fn invalidate_product(&self, id: EntityId) {
        self.cache.delete(&product_key(id)).await;
        let pattern = format!("{PRODUCT_PREFIX}:list:*");
        self.cache.delete_pattern(&pattern).await;
    }
}
