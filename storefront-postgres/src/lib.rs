//! PostgreSQL catalog store for the storefront service.
//!
//! Every unit of work is one database transaction on one pooled connection.
//! Products are locked with `SELECT ... FOR UPDATE` in ascending id order, so
//! overlapping placements queue behind each other instead of deadlocking, and
//! stock decrements are guarded in SQL so a row can never go negative.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nutype::nutype;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{query, Pool, Postgres, Row};
use storefront::{
    CatalogSeeder, CatalogStore, Decimal, NewProduct, Operation, Order, OrderId, OrderLine,
    OrderStatus, PlacedOrder, Product, ProductId, Quantity, StoreError,
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

mod unit_of_work;

pub use unit_of_work::PostgresUnitOfWork;

/// Failures while setting up or checking the store itself.
///
/// Errors of individual catalog operations are reported as [`StoreError`].
#[derive(Debug, Error)]
pub enum PostgresCatalogStoreError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// The database did not answer a trivial query.
    #[error("postgres health check failed")]
    PingFailed(#[source] sqlx::Error),

    /// Embedded schema migrations could not be applied.
    #[error("postgres migration failed")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// At least one, enforced by `NonZeroU32`. Every in-flight placement holds
/// one connection for its whole unit of work.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(NonZeroU32);

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: NonZeroU32 = NonZeroU32::MIN.saturating_add(9);

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Catalog and order store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Pool<Postgres>,
}

impl PostgresCatalogStore {
    /// Connect with the default pool configuration.
    pub async fn new<S: Into<String>>(
        connection_string: S,
    ) -> Result<Self, PostgresCatalogStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with a custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresCatalogStoreError> {
        let connection_string = connection_string.into();
        let max_connections: NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresCatalogStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Use an existing pool, for callers that manage pool settings themselves
    /// or share one pool across components.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), PostgresCatalogStoreError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(PostgresCatalogStoreError::PingFailed)?;
        Ok(())
    }

    /// Apply the embedded schema migrations.
    #[instrument(name = "postgres.migrate", skip(self))]
    pub async fn migrate(&self) -> Result<(), PostgresCatalogStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresCatalogStoreError::MigrationFailed)?;
        info!("[postgres.migrate] schema is up to date");
        Ok(())
    }
}

impl CatalogStore for PostgresCatalogStore {
    type UnitOfWork = PostgresUnitOfWork;

    #[instrument(name = "postgres.begin", skip(self))]
    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Begin))?;
        Ok(PostgresUnitOfWork::new(tx))
    }

    #[instrument(name = "postgres.list_products", skip(self))]
    async fn list_all_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = query("SELECT id, name, unit_price, stock_quantity FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ListProducts))?;

        rows.iter()
            .map(|row| product_from_row(row, Operation::ListProducts))
            .collect()
    }

    #[instrument(name = "postgres.find_order", skip(self))]
    async fn find_order(&self, order_id: OrderId) -> Result<Option<PlacedOrder>, StoreError> {
        let Some(header) = query("SELECT status, total, created_at FROM orders WHERE id = $1")
            .bind(order_id.into_inner())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindOrder))?
        else {
            return Ok(None);
        };

        let status: String = column(&header, "status", Operation::FindOrder)?;
        let status = match status.as_str() {
            "PLACED" => OrderStatus::Placed,
            other => {
                return Err(invalid_record(
                    Operation::FindOrder,
                    format!("unknown order status {other:?}"),
                ))
            }
        };
        let order = Order {
            id: order_id,
            created_at: column::<DateTime<Utc>>(&header, "created_at", Operation::FindOrder)?,
            status,
            total: column::<Decimal>(&header, "total", Operation::FindOrder)?,
        };

        let rows = query(
            "SELECT product_id, quantity, unit_price_at_purchase
             FROM order_lines
             WHERE order_id = $1
             ORDER BY product_id",
        )
        .bind(order_id.into_inner())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::FindOrder))?;

        let lines = rows
            .iter()
            .map(|row| line_from_row(row, order_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PlacedOrder { order, lines }))
    }
}

impl CatalogSeeder for PostgresCatalogStore {
    #[instrument(name = "postgres.add_product", skip(self))]
    async fn add_product(&self, product: NewProduct) -> Result<ProductId, StoreError> {
        let stock = i32::try_from(product.stock_quantity)
            .map_err(|error| invalid_record(Operation::AddProduct, error))?;

        let row = query(
            "INSERT INTO products (name, unit_price, stock_quantity) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(product.name)
        .bind(product.unit_price)
        .bind(stock)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AddProduct))?;

        let id: i64 = column(&row, "id", Operation::AddProduct)?;
        ProductId::try_new(id).map_err(|error| invalid_record(Operation::AddProduct, error))
    }

    #[instrument(name = "postgres.reprice_product", skip(self))]
    async fn reprice_product(
        &self,
        product_id: ProductId,
        unit_price: Decimal,
    ) -> Result<(), StoreError> {
        let updated = query("UPDATE products SET unit_price = $2 WHERE id = $1")
            .bind(product_id.into_inner())
            .bind(unit_price)
            .execute(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::RepriceProduct))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::ProductMissing {
                operation: Operation::RepriceProduct,
                product_id,
            });
        }
        Ok(())
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str, operation: Operation) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|error| map_sqlx_error(error, operation))
}

fn product_from_row(row: &PgRow, operation: Operation) -> Result<Product, StoreError> {
    let id: i64 = column(row, "id", operation)?;
    let stock: i32 = column(row, "stock_quantity", operation)?;

    Ok(Product {
        id: ProductId::try_new(id).map_err(|error| invalid_record(operation, error))?,
        name: column(row, "name", operation)?,
        unit_price: column(row, "unit_price", operation)?,
        stock_quantity: u32::try_from(stock).map_err(|error| invalid_record(operation, error))?,
    })
}

fn line_from_row(row: &PgRow, order_id: OrderId) -> Result<OrderLine, StoreError> {
    const OPERATION: Operation = Operation::FindOrder;

    let product_id: i64 = column(row, "product_id", OPERATION)?;
    let quantity: i32 = column(row, "quantity", OPERATION)?;
    let quantity = u32::try_from(quantity)
        .map_err(|error| invalid_record(OPERATION, error))
        .and_then(|raw| {
            Quantity::try_new(raw).map_err(|error| invalid_record(OPERATION, error))
        })?;

    Ok(OrderLine {
        order_id,
        product_id: ProductId::try_new(product_id)
            .map_err(|error| invalid_record(OPERATION, error))?,
        quantity,
        unit_price_at_purchase: column(row, "unit_price_at_purchase", OPERATION)?,
    })
}

fn invalid_record(operation: Operation, detail: impl fmt::Display) -> StoreError {
    let detail = detail.to_string();
    error!(
        operation = %operation,
        detail = %detail,
        "[postgres.invalid_record] row could not be mapped into the domain"
    );
    StoreError::InvalidRecord { operation, detail }
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => {
                warn!(
                    error = %db_error,
                    operation = %operation,
                    "[postgres.serialization_conflict] transaction lost to a concurrent writer"
                );
                return StoreError::Conflict { operation };
            }
            // foreign_key_violation, unique_violation, check_violation
            Some("23503" | "23505" | "23514") => {
                return invalid_record(operation, db_error.message());
            }
            _ => {}
        }
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::Unavailable { operation }
}
