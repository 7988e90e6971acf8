use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;

use crate::types::{NewProduct, OrderId, PlacedOrder, Product, ProductId, Quantity};

/// Identifies the store operation that failed.
///
/// Carried by every [`StoreError`] so callers and logs can tell which step
/// of a unit of work broke without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Opening a unit of work.
    Begin,
    /// Listing the catalog.
    ListProducts,
    /// Reading products with row exclusivity.
    LockProducts,
    /// Decrementing stock for one product.
    DecrementStock,
    /// Writing an order and its lines.
    InsertOrder,
    /// Reading back a committed order.
    FindOrder,
    /// Committing a unit of work.
    Commit,
    /// Rolling back a unit of work.
    Rollback,
    /// Adding a product to the catalog.
    AddProduct,
    /// Changing a product's unit price.
    RepriceProduct,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::ListProducts => "list_products",
            Self::LockProducts => "lock_products",
            Self::DecrementStock => "decrement_stock",
            Self::InsertOrder => "insert_order",
            Self::FindOrder => "find_order",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::AddProduct => "add_product",
            Self::RepriceProduct => "reprice_product",
        };
        f.write_str(name)
    }
}

/// Error returned by store adapters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Infrastructure failure (connection refused, pool exhausted, I/O error).
    #[error("{operation} operation failed")]
    Unavailable {
        /// Failing operation.
        operation: Operation,
    },

    /// A concurrent writer invalidated this unit of work.
    ///
    /// Raised by optimistic version checks, PostgreSQL serialization
    /// failures and deadlock detection. The whole unit of work must be
    /// retried from the beginning.
    #[error("{operation} operation conflicted with a concurrent writer")]
    Conflict {
        /// Failing operation.
        operation: Operation,
    },

    /// A write targeted a product the store does not hold.
    #[error("{operation} operation referenced missing product {product_id}")]
    ProductMissing {
        /// Failing operation.
        operation: Operation,
        /// The missing product.
        product_id: ProductId,
    },

    /// A stored row could not be mapped into the domain.
    #[error("{operation} operation read an invalid record: {detail}")]
    InvalidRecord {
        /// Failing operation.
        operation: Operation,
        /// What was wrong with the row.
        detail: String,
    },
}

impl StoreError {
    /// Whether retrying the whole unit of work may succeed.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// The operation that failed.
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Unavailable { operation }
            | Self::Conflict { operation }
            | Self::ProductMissing { operation, .. }
            | Self::InvalidRecord { operation, .. } => *operation,
        }
    }
}

/// Durable catalog and order storage.
///
/// Multi-step writes go through a [`UnitOfWork`] obtained from
/// [`CatalogStore::begin`]; nothing written through it is visible to other
/// callers until [`UnitOfWork::commit`] succeeds. Single reads run on their
/// own.
///
/// Implementations:
/// - `storefront-postgres`: PostgreSQL, row locks inside a transaction
/// - `storefront-memory`: in-process, optimistic version checks
pub trait CatalogStore: Send + Sync {
    /// The unit-of-work handle this store hands out.
    type UnitOfWork: UnitOfWork;

    /// Open a unit of work.
    ///
    /// The handle owns whatever resource backs it (a pooled connection for
    /// PostgreSQL). Dropping it without committing rolls everything back and
    /// releases that resource.
    fn begin(&self) -> impl Future<Output = Result<Self::UnitOfWork, StoreError>> + Send;

    /// Every product in the catalog, ordered by id.
    fn list_all_products(&self) -> impl Future<Output = Result<Vec<Product>, StoreError>> + Send;

    /// A committed order with its lines, or `None` if no such order exists.
    fn find_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<PlacedOrder>, StoreError>> + Send;
}

/// One atomic group of store operations.
///
/// Every call participates in the same transaction; there is no auto-commit
/// between steps.
pub trait UnitOfWork: Send {
    /// Read the given products so that no concurrent unit of work can change
    /// them unnoticed until this one finishes.
    ///
    /// Ids missing from the catalog are simply absent from the result.
    fn get_products_for_update(
        &mut self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<HashMap<ProductId, Product>, StoreError>> + Send;

    /// Decrement a product's stock.
    ///
    /// Fails with [`StoreError::Conflict`] rather than letting stock go
    /// negative.
    fn decrement_stock(
        &mut self,
        product_id: ProductId,
        amount: Quantity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Write an order header and all of its lines.
    fn insert_order(
        &mut self,
        order: &PlacedOrder,
    ) -> impl Future<Output = Result<OrderId, StoreError>> + Send;

    /// Make every change of this unit of work visible at once.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every change of this unit of work.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Catalog provisioning used by fixtures and operational tooling.
///
/// Never touches stock of existing products.
pub trait CatalogSeeder: Send + Sync {
    /// Insert a product and return its assigned id.
    fn add_product(
        &self,
        product: NewProduct,
    ) -> impl Future<Output = Result<ProductId, StoreError>> + Send;

    /// Change the current unit price of a product.
    fn reprice_product(
        &self,
        product_id: ProductId,
        unit_price: Decimal,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
