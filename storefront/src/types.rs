use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use nutype::nutype;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ValidationError;

/// Catalog product identifier.
///
/// Product ids are positive 64-bit integers assigned by the catalog store
/// (`BIGSERIAL` in PostgreSQL). Zero and negative values are rejected at
/// construction, so any `ProductId` in hand refers to a plausible row.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct ProductId(i64);

/// Number of units requested for a single product.
///
/// Always positive. The upper bound matches PostgreSQL `INTEGER` so a
/// quantity can be bound to a query without a fallible conversion.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 2_147_483_647),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(u32);

impl Quantity {
    /// The quantity as a signed 32-bit integer, for binding to SQL `INTEGER` columns.
    pub fn as_i32(self) -> i32 {
        // Bounded by validation.
        i32::try_from(self.into_inner()).unwrap_or(i32::MAX)
    }
}

/// Order identifier.
///
/// UUIDv7, so identifiers sort by creation time.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    AsRef,
    Into,
    Serialize,
    Deserialize
))]
pub struct OrderId(Uuid);

impl OrderId {
    /// Generate a fresh, time-ordered order id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// A product in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Catalog identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Current price of one unit.
    pub unit_price: Decimal,
    /// Units currently available for sale.
    pub stock_quantity: u32,
}

/// Input for adding a product to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    /// Display name.
    pub name: String,
    /// Price of one unit.
    pub unit_price: Decimal,
    /// Initial stock.
    pub stock_quantity: u32,
}

impl NewProduct {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, unit_price: Decimal, stock_quantity: u32) -> Self {
        Self {
            name: name.into(),
            unit_price,
            stock_quantity,
        }
    }
}

/// One (product, quantity) pair of an order request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineItem {
    /// Product being ordered.
    pub product_id: ProductId,
    /// Units requested.
    pub quantity: Quantity,
}

impl LineItem {
    /// Build a line item from already validated parts.
    pub const fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            quantity,
        }
    }

    /// Build a line item from raw values, validating both.
    pub fn try_from_raw(product_id: i64, quantity: u32) -> Result<Self, ValidationError> {
        Ok(Self {
            product_id: ProductId::try_new(product_id)?,
            quantity: Quantity::try_new(quantity)?,
        })
    }
}

/// A request to place an order.
///
/// Transient: it exists only for the duration of a placement call and is
/// never persisted. Construction guarantees at least one line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    items: Vec<LineItem>,
}

impl OrderRequest {
    /// Validate and wrap a list of line items.
    pub fn try_new(items: Vec<LineItem>) -> Result<Self, ValidationError> {
        if items.is_empty() {
            return Err(ValidationError::EmptyOrder);
        }
        Ok(Self { items })
    }

    /// Line items in request order, duplicates included.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Line items with duplicate product ids summed, ordered by product id.
    ///
    /// Ascending id order is also the order in which stores lock rows, which
    /// keeps overlapping placements from deadlocking each other.
    pub fn consolidated(&self) -> Result<BTreeMap<ProductId, Quantity>, ValidationError> {
        let mut totals: BTreeMap<ProductId, u32> = BTreeMap::new();
        for item in &self.items {
            let entry = totals.entry(item.product_id).or_insert(0);
            *entry = entry
                .checked_add(item.quantity.into_inner())
                .ok_or(ValidationError::QuantityOverflow {
                    product_id: item.product_id,
                })?;
        }

        totals
            .into_iter()
            .map(|(product_id, total)| {
                Quantity::try_new(total)
                    .map(|quantity| (product_id, quantity))
                    .map_err(|_| ValidationError::QuantityOverflow { product_id })
            })
            .collect()
    }
}

/// Lifecycle status of an order.
///
/// Only `Placed` is ever persisted; `Failed` describes a placement that was
/// aborted and left no trace in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Committed together with its lines and stock decrements.
    Placed,
    /// Aborted before commit.
    Failed,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placed => write!(f, "PLACED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Order header. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Placement time, microsecond precision.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Sum of `quantity * unit_price_at_purchase` over the order's lines.
    pub total: Decimal,
}

/// One line of a placed order.
///
/// The unit price is captured at purchase time so later catalog price
/// changes never alter historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Owning order.
    pub order_id: OrderId,
    /// Referenced product.
    pub product_id: ProductId,
    /// Units purchased.
    pub quantity: Quantity,
    /// Price of one unit when the order was placed.
    pub unit_price_at_purchase: Decimal,
}

impl OrderLine {
    /// `quantity * unit_price_at_purchase`, or `None` on decimal overflow.
    pub fn subtotal(&self) -> Option<Decimal> {
        self.unit_price_at_purchase
            .checked_mul(Decimal::from(self.quantity.into_inner()))
    }
}

/// An order together with its lines, as written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// Order header.
    pub order: Order,
    /// Lines ordered by product id.
    pub lines: Vec<OrderLine>,
}

impl PlacedOrder {
    /// Assemble a placed order, computing its total from the lines.
    ///
    /// `created_at` is truncated to microseconds, the resolution of
    /// PostgreSQL `TIMESTAMPTZ`, so the value survives a store round trip.
    pub fn from_lines(
        id: OrderId,
        created_at: DateTime<Utc>,
        lines: Vec<OrderLine>,
    ) -> Result<Self, ValidationError> {
        let total = lines.iter().try_fold(Decimal::ZERO, |total, line| {
            line.subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or(ValidationError::TotalOverflow)
        })?;

        Ok(Self {
            order: Order {
                id,
                created_at: created_at.trunc_subsecs(6),
                status: OrderStatus::Placed,
                total,
            },
            lines,
        })
    }

    /// The order's identifier.
    pub fn id(&self) -> OrderId {
        self.order.id
    }
}
