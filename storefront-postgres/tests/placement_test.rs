mod common;

use std::sync::Arc;

use common::{PostgresTestFixture, order};
use rust_decimal_macros::dec;
use storefront::{
    CatalogQuery, CatalogSeeder, CatalogStore, OrderStatus, PlaceOrderError, ProductId, Quantity,
    ReservationEngine,
};
use tokio::sync::Barrier;
use tokio::task::JoinSet;

async fn stock_of(fixture: &PostgresTestFixture, product_id: ProductId) -> u32 {
    fixture
        .store
        .list_all_products()
        .await
        .expect("listing should succeed")
        .into_iter()
        .find(|product| product.id == product_id)
        .map(|product| product.stock_quantity)
        .expect("product should be listed")
}

#[tokio::test(flavor = "multi_thread")]
async fn placing_an_order_decrements_stock_and_records_purchase_price() {
    // Given: a mug with 5 units at 10.00
    let fixture = PostgresTestFixture::new().await;
    let mug = fixture.seed("Mug", dec!(10.00), 5).await;
    let engine = ReservationEngine::new(fixture.store.clone());

    // When: 3 mugs are ordered
    let order_id = engine
        .place_order(&order(&[(mug, 3)]))
        .await
        .expect("order should be placed");

    // Then: stock drops to 2 and the order is stored with its total
    assert_eq!(stock_of(&fixture, mug).await, 2);
    let placed = fixture
        .store
        .find_order(order_id)
        .await
        .expect("lookup should succeed")
        .expect("order should exist");
    assert_eq!(placed.order.total, dec!(30.00));
    assert_eq!(placed.order.status, OrderStatus::Placed);
    assert_eq!(placed.lines.len(), 1);
    assert_eq!(placed.lines[0].unit_price_at_purchase, dec!(10.00));
    assert_eq!(
        placed.lines[0].quantity,
        Quantity::try_new(3).expect("valid quantity")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn insufficient_stock_leaves_catalog_untouched() {
    // Given: 2 mugs and 9 pens
    let fixture = PostgresTestFixture::new().await;
    let mug = fixture.seed("Mug", dec!(10.00), 2).await;
    let pen = fixture.seed("Pen", dec!(1.50), 9).await;
    let engine = ReservationEngine::new(fixture.store.clone());

    // When: the order asks for one pen and three mugs
    let result = engine.place_order(&order(&[(pen, 1), (mug, 3)])).await;

    // Then: neither line is applied
    assert_eq!(
        result,
        Err(PlaceOrderError::InsufficientStock {
            product_id: mug,
            requested: Quantity::try_new(3).expect("valid quantity"),
            available: 2,
        })
    );
    assert_eq!(stock_of(&fixture, mug).await, 2);
    assert_eq!(stock_of(&fixture, pen).await, 9);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_product_is_reported_without_side_effects() {
    let fixture = PostgresTestFixture::new().await;
    let mug = fixture.seed("Mug", dec!(10.00), 5).await;
    let missing = ProductId::try_new(999).expect("valid id");
    let engine = ReservationEngine::new(fixture.store.clone());

    let result = engine.place_order(&order(&[(mug, 1), (missing, 1)])).await;

    assert_eq!(
        result,
        Err(PlaceOrderError::ProductNotFound {
            product_id: missing,
        })
    );
    assert_eq!(stock_of(&fixture, mug).await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn repricing_after_purchase_keeps_historical_price() {
    let fixture = PostgresTestFixture::new().await;
    let mug = fixture.seed("Mug", dec!(10.00), 5).await;
    let engine = ReservationEngine::new(fixture.store.clone());
    let order_id = engine
        .place_order(&order(&[(mug, 2)]))
        .await
        .expect("order should be placed");

    fixture
        .store
        .reprice_product(mug, dec!(12.50))
        .await
        .expect("repricing should succeed");

    let placed = fixture
        .store
        .find_order(order_id)
        .await
        .expect("lookup should succeed")
        .expect("order should exist");
    assert_eq!(placed.lines[0].unit_price_at_purchase, dec!(10.00));
    assert_eq!(placed.order.total, dec!(20.00));
    let listing = CatalogQuery::new(fixture.store.clone())
        .list_products()
        .await
        .expect("listing should succeed");
    assert_eq!(listing[0].unit_price, dec!(12.50));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_orders_never_oversell() {
    // Given: 10 units and 25 customers each wanting one
    let fixture = PostgresTestFixture::new().await;
    let mug = fixture.seed("Mug", dec!(10.00), 10).await;
    let engine = ReservationEngine::new(fixture.store.clone());
    let barrier = Arc::new(Barrier::new(25));

    // When: they all order at once
    let mut tasks = JoinSet::new();
    for _ in 0..25 {
        let engine = engine.clone();
        let barrier = Arc::clone(&barrier);
        let _ = tasks.spawn(async move {
            let _ = barrier.wait().await;
            engine.place_order(&order(&[(mug, 1)])).await
        });
    }
    let results = tasks.join_all().await;

    // Then: exactly ten succeed and the rest see the empty shelf
    let placed = results.iter().filter(|result| result.is_ok()).count();
    let sold_out = results
        .iter()
        .filter(|result| matches!(result, Err(PlaceOrderError::InsufficientStock { .. })))
        .count();
    assert_eq!(placed, 10);
    assert_eq!(sold_out, 15);
    assert_eq!(stock_of(&fixture, mug).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_orders_in_opposite_line_order_do_not_deadlock() {
    // Given: two products with plenty of stock
    let fixture = PostgresTestFixture::new().await;
    let mug = fixture.seed("Mug", dec!(10.00), 100).await;
    let pen = fixture.seed("Pen", dec!(1.50), 100).await;
    let engine = ReservationEngine::new(fixture.store.clone());

    // When: half the orders list the mug first, the other half the pen
    let mut tasks = JoinSet::new();
    for index in 0..20 {
        let engine = engine.clone();
        let lines = if index % 2 == 0 {
            vec![(mug, 1), (pen, 2)]
        } else {
            vec![(pen, 2), (mug, 1)]
        };
        let _ = tasks.spawn(async move { engine.place_order(&order(&lines)).await });
    }
    let results = tasks.join_all().await;

    // Then: every order succeeds and stock adds up
    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(stock_of(&fixture, mug).await, 80);
    assert_eq!(stock_of(&fixture, pen).await, 60);
}
