//! Whatever sequence of orders arrives, stock never goes negative and every
//! unit that left the shelf belongs to exactly one committed order.

use std::collections::HashMap;

use proptest::prelude::*;
use rust_decimal_macros::dec;
use storefront::{
    CatalogStore, LineItem, NewProduct, OrderRequest, PlaceOrderError, ProductId,
    ReservationEngine,
};
use storefront_memory::InMemoryCatalogStore;

const PRODUCT_COUNT: usize = 4;
/// Never seeded, so lines naming it are rejected.
const MISSING_PRODUCT: i64 = 5;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime should build")
}

fn arb_request() -> impl Strategy<Value = Vec<(i64, u32)>> {
    prop::collection::vec((1..=MISSING_PRODUCT, 1u32..6), 1..5)
}

fn request(lines: &[(i64, u32)]) -> OrderRequest {
    let items = lines
        .iter()
        .map(|&(product_id, quantity)| {
            LineItem::try_from_raw(product_id, quantity).expect("valid line item")
        })
        .collect();
    OrderRequest::try_new(items).expect("non-empty order")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn committed_orders_account_for_every_unit_sold(
        initial_stock in prop::collection::vec(0u32..12, PRODUCT_COUNT),
        requests in prop::collection::vec(arb_request(), 1..20),
    ) {
        let store = InMemoryCatalogStore::with_products(
            initial_stock
                .iter()
                .enumerate()
                .map(|(index, stock)| NewProduct::new(format!("product-{index}"), dec!(1.00), *stock)),
        )
        .expect("seeding should succeed");
        let engine = ReservationEngine::new(store.clone());

        let order_ids = runtime().block_on(async {
            let mut order_ids = Vec::new();
            for lines in &requests {
                match engine.place_order(&request(lines)).await {
                    Ok(order_id) => order_ids.push(order_id),
                    Err(
                        PlaceOrderError::InsufficientStock { .. }
                        | PlaceOrderError::ProductNotFound { .. },
                    ) => {}
                    Err(other) => panic!("unexpected placement failure: {other}"),
                }
            }
            order_ids
        });

        let mut sold: HashMap<ProductId, u32> = HashMap::new();
        runtime().block_on(async {
            for order_id in &order_ids {
                let placed = store
                    .find_order(*order_id)
                    .await
                    .expect("lookup should succeed")
                    .expect("committed order should exist");
                for line in placed.lines {
                    *sold.entry(line.product_id).or_insert(0) += line.quantity.into_inner();
                }
            }
        });

        prop_assert_eq!(store.order_count(), order_ids.len());
        for (index, initial) in initial_stock.iter().enumerate() {
            let product_id = ProductId::try_new(i64::try_from(index).expect("index fits") + 1)
                .expect("valid id");
            let remaining = store.stock_of(product_id).expect("product exists");
            let sold = sold.get(&product_id).copied().unwrap_or(0);
            prop_assert_eq!(remaining + sold, *initial);
        }
    }

    #[test]
    fn rejected_orders_change_nothing(
        stock in 0u32..5,
        extra in 1u32..5,
    ) {
        let store = InMemoryCatalogStore::with_products([NewProduct::new("Mug", dec!(2.50), stock)])
            .expect("seeding should succeed");
        let engine = ReservationEngine::new(store.clone());

        let result = runtime().block_on(engine.place_order(&request(&[(1, stock + extra)])));

        prop_assert!(
            matches!(result, Err(PlaceOrderError::InsufficientStock { .. })),
            "expected insufficient stock, got {:?}",
            result
        );
        prop_assert_eq!(store.stock_of(ProductId::try_new(1).expect("valid id")), Some(stock));
        prop_assert_eq!(store.order_count(), 0);
    }
}
