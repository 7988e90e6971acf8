//! JSON bodies accepted and returned by the HTTP API.
//!
//! Monetary amounts are serialized as decimal strings (`"10.00"`) so no
//! precision is lost in transit.

use serde::{Deserialize, Serialize};
use storefront::{Decimal, LineItem, OrderId, OrderRequest, Product, ValidationError};

/// One product as listed by `GET /products`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductView {
    /// Catalog identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Current price of one unit.
    pub unit_price: Decimal,
    /// Units available.
    pub stock_quantity: u32,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.into_inner(),
            name: product.name,
            unit_price: product.unit_price,
            stock_quantity: product.stock_quantity,
        }
    }
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Requested lines, duplicates allowed.
    pub items: Vec<PlaceOrderItem>,
}

/// One requested line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderItem {
    /// Product to reserve.
    pub product_id: i64,
    /// Units to reserve.
    pub quantity: u32,
}

impl TryFrom<PlaceOrderRequest> for OrderRequest {
    type Error = ValidationError;

    fn try_from(request: PlaceOrderRequest) -> Result<Self, Self::Error> {
        let items = request
            .items
            .into_iter()
            .map(|item| LineItem::try_from_raw(item.product_id, item.quantity))
            .collect::<Result<Vec<_>, _>>()?;
        Self::try_new(items)
    }
}

/// Body of a successful `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    /// Identifier of the committed order.
    pub order_id: OrderId,
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable reason.
    pub error: String,
}
