//! HTTP front end for the storefront service.
//!
//! Exposes the catalog listing and order placement over JSON:
//!
//! - `GET /products` lists the catalog
//! - `POST /orders` places an order
//! - `GET /health` answers `200 OK`
//!
//! The router is generic over the [`storefront::CatalogStore`] so the binary
//! can run it on PostgreSQL while tests drive it on the in-memory store.

pub mod api;
pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

mod shutdown;

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use routes::{router, AppState};
pub use shutdown::shutdown_signal;
