#![forbid(
    dead_code,
    invalid_value,
    overflowing_literals,
    unconditional_recursion,
    unreachable_pub,
    unused_allocation,
    unsafe_code
)]
#![deny(
    bad_style,
    deprecated,
    meta_variable_misuse,
    non_ascii_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    rust_2021_compatibility,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_code,
    unused_assignments,
    unused_attributes,
    unused_extern_crates,
    unused_imports,
    unused_must_use,
    unused_mut,
    unused_parens,
    unused_qualifications,
    unused_results,
    unused_variables
)]

//! Inventory reservation and order placement for the storefront service.
//!
//! The crate owns the one piece of the service with real design risk: placing
//! an order so that concurrent customers can never oversell the same unit of
//! stock. Everything around it (HTTP, configuration, migrations) lives in
//! other crates and talks to this one through a narrow interface.
//!
//! # Overview
//!
//! - Domain types: [`Product`], [`OrderRequest`], [`Order`], [`OrderLine`], [`PlacedOrder`]
//! - Store access layer: [`CatalogStore`], [`UnitOfWork`], [`CatalogSeeder`]
//! - The engine: [`ReservationEngine`] with its [`RetryPolicy`]
//! - Read side: [`CatalogQuery`]
//! - Errors: [`PlaceOrderError`], [`ValidationError`], [`StoreError`]
//!
//! Adapters live in `storefront-postgres` (production) and
//! `storefront-memory` (tests and local development).

mod catalog;
mod errors;
mod placement;
mod retry;
mod store;
mod types;

pub use catalog::CatalogQuery;
pub use errors::{PlaceOrderError, ValidationError};
pub use placement::ReservationEngine;
pub use retry::{
    BackoffMultiplier, BackoffMultiplierError, ConflictPhase, MaxAttempts, MaxAttemptsError,
    MaxAttemptsParseError, MetricsHook, RetryContext, RetryPolicy,
};
pub use store::{CatalogSeeder, CatalogStore, Operation, StoreError, UnitOfWork};
pub use types::{
    LineItem, NewProduct, Order, OrderId, OrderLine, OrderRequest, OrderStatus, PlacedOrder,
    Product, ProductId, ProductIdError, Quantity, QuantityError,
};

/// Decimal type used for every monetary amount.
pub use rust_decimal::Decimal;
