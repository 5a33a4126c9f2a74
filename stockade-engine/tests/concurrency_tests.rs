//! Concurrency tests for the reservation engine.
//!
//! These hammer one product from many tasks and check the invariant the
//! whole engine exists for: committed stock never goes negative and
//! every unit is accounted for by exactly one line item.

use std::sync::Arc;

use chrono::Utc;
use stockade_core::{
    new_entity_id, EntityId, InventoryError, LineItemUpdate, NewLineItem, Order, Product,
};
use stockade_engine::{MemoryStore, ReservationEngine, ReservationStore};

fn seed(stock: i32) -> (MemoryStore, ReservationEngine, EntityId, EntityId) {
    let store = MemoryStore::new();
    let order_id = new_entity_id();
    store.insert_order(Order {
        order_id,
        created_at: Utc::now(),
    });
    let now = Utc::now();
    let product_id = new_entity_id();
    store.insert_product(Product {
        product_id,
        name: "Contended".to_string(),
        price: 10.0,
        stock,
        category_id: None,
        created_at: now,
        updated_at: now,
    });
    let engine = ReservationEngine::new(Arc::new(store.clone()));
    (store, engine, order_id, product_id)
}

async fn stock_of(store: &MemoryStore, id: EntityId) -> i32 {
    store.product_get(id).await.unwrap().unwrap().stock
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_oversell_under_contention() {
    let (store, engine, order_id, product_id) = seed(10);

    let mut handles = Vec::new();
    for _ in 0..100 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve(NewLineItem {
                    order_id,
                    product_id,
                    quantity: 1,
                    unit_price: None,
                })
                .await
        }));
    }

    let mut successes = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(InventoryError::InsufficientStock { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 10);
    assert_eq!(insufficient, 90);
    assert_eq!(stock_of(&store, product_id).await, 0);
    assert_eq!(store.line_item_count(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adjusts_cannot_oversell() {
    let (store, engine, order_id, product_id) = seed(51);

    let item = engine
        .reserve(NewLineItem {
            order_id,
            product_id,
            quantity: 1,
            unit_price: None,
        })
        .await
        .unwrap();
    assert_eq!(stock_of(&store, product_id).await, 50);

    // 50 tasks race to grow the same line item from 1 to 51 units, a
    // delta of 50 each: only the first can be granted real units, the
    // rest either fail on stock or observe the already-grown line.
    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        let line_item_id = item.line_item_id;
        handles.push(tokio::spawn(async move {
            engine.adjust(line_item_id, LineItemUpdate::quantity(51)).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(InventoryError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(successes >= 1);
    assert_eq!(stock_of(&store, product_id).await, 0);
    assert_eq!(
        engine.line_item(item.line_item_id).await.unwrap().quantity,
        51
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reserve_release_churn_conserves_stock() {
    let (store, engine, order_id, product_id) = seed(20);

    let mut handles = Vec::new();
    for i in 0..30 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let quantity = (i % 3) + 1;
            match engine
                .reserve(NewLineItem {
                    order_id,
                    product_id,
                    quantity,
                    unit_price: None,
                })
                .await
            {
                Ok(item) => {
                    engine.release(item.line_item_id).await.unwrap();
                }
                Err(InventoryError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every reservation was released, so the full stock is back.
    assert_eq!(stock_of(&store, product_id).await, 20);
    assert_eq!(store.line_item_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_product_switches_do_not_deadlock() {
    let (store, engine, order_id, product_a) = seed(100);
    let now = Utc::now();
    let product_b = new_entity_id();
    store.insert_product(Product {
        product_id: product_b,
        name: "Other".to_string(),
        price: 10.0,
        stock: 100,
        category_id: None,
        created_at: now,
        updated_at: now,
    });

    // Half the line items sit on each product; tasks swap them in both
    // directions at once. Ascending-id lock order keeps this from
    // deadlocking.
    let mut on_a = Vec::new();
    let mut on_b = Vec::new();
    for _ in 0..10 {
        let a = engine
            .reserve(NewLineItem {
                order_id,
                product_id: product_a,
                quantity: 1,
                unit_price: None,
            })
            .await
            .unwrap();
        on_a.push(a.line_item_id);
        let b = engine
            .reserve(NewLineItem {
                order_id,
                product_id: product_b,
                quantity: 1,
                unit_price: None,
            })
            .await
            .unwrap();
        on_b.push(b.line_item_id);
    }

    let mut handles = Vec::new();
    for id in on_a {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .adjust(
                    id,
                    LineItemUpdate {
                        product_id: Some(product_b),
                        ..LineItemUpdate::default()
                    },
                )
                .await
                .unwrap();
        }));
    }
    for id in on_b {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .adjust(
                    id,
                    LineItemUpdate {
                        product_id: Some(product_a),
                        ..LineItemUpdate::default()
                    },
                )
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 20 single-unit reservations remain across the two products.
    let total = stock_of(&store, product_a).await + stock_of(&store, product_b).await;
    assert_eq!(total, 180);
    assert_eq!(store.line_item_count(), 20);
}
