use std::collections::HashMap;
use std::fmt;

use sqlx::{query, Postgres, Transaction};
use storefront::{
    Operation, OrderId, PlacedOrder, Product, ProductId, Quantity, StoreError, UnitOfWork,
};
use tracing::{debug, instrument, warn};

use crate::{map_sqlx_error, product_from_row};

/// One PostgreSQL transaction.
///
/// Dropping it without committing rolls the transaction back and returns the
/// connection to the pool.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PostgresUnitOfWork {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

impl fmt::Debug for PostgresUnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresUnitOfWork").finish_non_exhaustive()
    }
}

impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(name = "postgres.lock_products", skip(self, ids), fields(product_count = ids.len()))]
    async fn get_products_for_update(
        &mut self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.into_inner()).collect();

        // Ascending id order keeps lock acquisition consistent across transactions.
        let rows = query(
            "SELECT id, name, unit_price, stock_quantity
             FROM products
             WHERE id = ANY($1)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(raw_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::LockProducts))?;

        rows.iter()
            .map(|row| {
                product_from_row(row, Operation::LockProducts).map(|product| (product.id, product))
            })
            .collect()
    }

    #[instrument(name = "postgres.decrement_stock", skip(self))]
    async fn decrement_stock(
        &mut self,
        product_id: ProductId,
        amount: Quantity,
    ) -> Result<(), StoreError> {
        let updated = query(
            "UPDATE products
             SET stock_quantity = stock_quantity - $2
             WHERE id = $1 AND stock_quantity >= $2",
        )
        .bind(product_id.into_inner())
        .bind(amount.as_i32())
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::DecrementStock))?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let exists = query("SELECT 1 FROM products WHERE id = $1")
            .bind(product_id.into_inner())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::DecrementStock))?
            .is_some();

        if !exists {
            return Err(StoreError::ProductMissing {
                operation: Operation::DecrementStock,
                product_id,
            });
        }

        warn!(
            product_id = %product_id,
            requested = %amount,
            "[postgres.stock_guard] decrement would drive stock negative"
        );
        Err(StoreError::Conflict {
            operation: Operation::DecrementStock,
        })
    }

    #[instrument(
        name = "postgres.insert_order",
        skip(self, order),
        fields(order_id = %order.id(), line_count = order.lines.len())
    )]
    async fn insert_order(&mut self, order: &PlacedOrder) -> Result<OrderId, StoreError> {
        query("INSERT INTO orders (id, status, total, created_at) VALUES ($1, $2, $3, $4)")
            .bind(order.id().into_inner())
            .bind(order.order.status.to_string())
            .bind(order.order.total)
            .bind(order.order.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::InsertOrder))?;

        for line in &order.lines {
            query(
                "INSERT INTO order_lines (order_id, product_id, quantity, unit_price_at_purchase)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(line.order_id.into_inner())
            .bind(line.product_id.into_inner())
            .bind(line.quantity.as_i32())
            .bind(line.unit_price_at_purchase)
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::InsertOrder))?;
        }

        debug!("[postgres.insert_order] order staged");
        Ok(order.id())
    }

    #[instrument(name = "postgres.commit", skip(self))]
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Commit))
    }

    #[instrument(name = "postgres.rollback", skip(self))]
    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Rollback))
    }
}
