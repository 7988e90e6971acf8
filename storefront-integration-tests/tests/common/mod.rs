//! Helpers shared by the integration test binaries.

// Not every test binary uses every helper.
#![allow(dead_code)]

use storefront::{Decimal, LineItem, NewProduct, OrderRequest, ProductId, Quantity};
use storefront_memory::InMemoryCatalogStore;

pub fn id(raw: i64) -> ProductId {
    ProductId::try_new(raw).expect("valid product id")
}

pub fn qty(raw: u32) -> Quantity {
    Quantity::try_new(raw).expect("valid quantity")
}

/// Store seeded with `(name, price, stock)` rows; ids are assigned from 1.
pub fn store_with(products: &[(&str, Decimal, u32)]) -> InMemoryCatalogStore {
    InMemoryCatalogStore::with_products(
        products
            .iter()
            .map(|(name, price, stock)| NewProduct::new(*name, *price, *stock)),
    )
    .expect("seeding should succeed")
}

/// Build an order request from raw `(product id, quantity)` pairs.
pub fn order(lines: &[(i64, u32)]) -> OrderRequest {
    let items = lines
        .iter()
        .map(|&(product_id, quantity)| {
            LineItem::try_from_raw(product_id, quantity).expect("valid line item")
        })
        .collect();
    OrderRequest::try_new(items).expect("non-empty order")
}
