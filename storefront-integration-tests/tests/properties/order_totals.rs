//! The stored total always equals the sum of quantity times purchase price.

use proptest::prelude::*;
use storefront::{
    CatalogStore, Decimal, LineItem, NewProduct, OrderRequest, ReservationEngine,
};
use storefront_memory::InMemoryCatalogStore;

fn arb_price() -> impl Strategy<Value = Decimal> {
    (0i64..100_000).prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn total_is_sum_of_line_subtotals(
        catalog in prop::collection::vec((arb_price(), 1u32..10), 1..6),
    ) {
        let store = InMemoryCatalogStore::with_products(
            catalog
                .iter()
                .enumerate()
                .map(|(index, (price, _))| NewProduct::new(format!("product-{index}"), *price, 100)),
        )
        .expect("seeding should succeed");
        let items = catalog
            .iter()
            .enumerate()
            .map(|(index, (_, quantity))| {
                LineItem::try_from_raw(i64::try_from(index).expect("index fits") + 1, *quantity)
                    .expect("valid line item")
            })
            .collect();
        let request = OrderRequest::try_new(items).expect("non-empty order");
        let engine = ReservationEngine::new(store.clone());

        let placed = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime should build")
            .block_on(async {
                let order_id = engine.place_order(&request).await.expect("order should be placed");
                store
                    .find_order(order_id)
                    .await
                    .expect("lookup should succeed")
                    .expect("order should exist")
            });

        let expected: Decimal = catalog
            .iter()
            .map(|(price, quantity)| *price * Decimal::from(*quantity))
            .sum();
        prop_assert_eq!(placed.order.total, expected);
        prop_assert_eq!(placed.lines.len(), catalog.len());
    }
}
