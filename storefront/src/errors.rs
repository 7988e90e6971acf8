use thiserror::Error;

use crate::store::StoreError;
use crate::types::{ProductId, ProductIdError, Quantity, QuantityError};

/// Malformed order input.
///
/// Permanent: resubmitting the same input fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request carried no line items.
    #[error("order must contain at least one line item")]
    EmptyOrder,

    /// A line item quantity was zero or out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A line item referenced a non-positive product id.
    #[error("invalid product id: {0}")]
    InvalidProductId(String),

    /// Duplicate lines for one product summed beyond the supported quantity.
    #[error("combined quantity for product {product_id} exceeds the supported maximum")]
    QuantityOverflow {
        /// Product whose lines overflowed.
        product_id: ProductId,
    },

    /// The order total does not fit the decimal range.
    #[error("order total exceeds the supported decimal range")]
    TotalOverflow,
}

impl From<QuantityError> for ValidationError {
    fn from(err: QuantityError) -> Self {
        Self::InvalidQuantity(err.to_string())
    }
}

impl From<ProductIdError> for ValidationError {
    fn from(err: ProductIdError) -> Self {
        Self::InvalidProductId(err.to_string())
    }
}

/// Failure of an order placement.
///
/// No variant ever leaves partial state behind: the order and all of its
/// stock decrements are either committed together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceOrderError {
    /// The request itself is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A line item referenced a product that does not exist.
    #[error("product {product_id} does not exist")]
    ProductNotFound {
        /// The missing product.
        product_id: ProductId,
    },

    /// A line item asked for more units than are in stock.
    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        /// The product that ran short.
        product_id: ProductId,
        /// Units requested (after summing duplicate lines).
        requested: Quantity,
        /// Units in stock when the row was read.
        available: u32,
    },

    /// Every attempt collided with a concurrent writer.
    #[error("order placement conflicted with concurrent writers after {attempts} attempts")]
    ConcurrentModification {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The store could not be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The caller's deadline passed before the order could be staged.
    #[error("order placement exceeded its deadline")]
    DeadlineExceeded,
}

impl PlaceOrderError {
    /// Whether the caller may reasonably retry the same request.
    ///
    /// Only transport failures and exhausted conflict retries qualify; every
    /// other failure would repeat identically.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ConcurrentModification { .. }
        )
    }
}
