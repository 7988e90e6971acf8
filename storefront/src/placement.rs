//! The inventory reservation engine.
//!
//! One placement is one unit of work: lock the requested products, check
//! every line against the locked snapshot, decrement stock, write the order
//! and commit. A conflict anywhere restarts the whole unit of work, up to the
//! configured attempt limit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::errors::PlaceOrderError;
use crate::retry::{ConflictPhase, MetricsHook, RetryContext, RetryPolicy};
use crate::store::{CatalogStore, StoreError, UnitOfWork};
use crate::types::{OrderId, OrderLine, OrderRequest, PlacedOrder, ProductId, Quantity};

/// Places orders atomically against a [`CatalogStore`].
///
/// The engine holds no mutable state of its own. Clone it freely and share
/// it across tasks; concurrent placements are serialized by the store.
#[derive(Clone)]
pub struct ReservationEngine<S> {
    store: S,
    retry_policy: RetryPolicy,
    metrics_hook: Option<Arc<dyn MetricsHook>>,
}

impl<S> fmt::Debug for ReservationEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationEngine")
            .field("retry_policy", &self.retry_policy)
            .field("metrics_hook", &self.metrics_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Why a single attempt did not produce an order.
enum AttemptFailure {
    /// A concurrent writer got in the way; the attempt may be repeated.
    Conflict(ConflictPhase),
    /// Final for this placement.
    Aborted(PlaceOrderError),
}

impl AttemptFailure {
    fn from_store(phase: ConflictPhase, error: StoreError) -> Self {
        match error {
            StoreError::Conflict { .. } => Self::Conflict(phase),
            StoreError::ProductMissing { product_id, .. } => {
                Self::Aborted(PlaceOrderError::ProductNotFound { product_id })
            }
            other => Self::Aborted(PlaceOrderError::StoreUnavailable(other)),
        }
    }

    fn validating(error: StoreError) -> Self {
        Self::from_store(ConflictPhase::Validating, error)
    }

    fn committing(error: StoreError) -> Self {
        Self::from_store(ConflictPhase::Committing, error)
    }
}

impl From<PlaceOrderError> for AttemptFailure {
    fn from(error: PlaceOrderError) -> Self {
        Self::Aborted(error)
    }
}

impl<S> ReservationEngine<S>
where
    S: CatalogStore,
{
    /// Engine with the default retry policy (three attempts) and no hook.
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
            metrics_hook: None,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Report every retry to `hook`.
    #[must_use]
    pub fn with_metrics_hook(mut self, hook: Arc<dyn MetricsHook>) -> Self {
        self.metrics_hook = Some(hook);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Place an order, reserving stock for every line or for none.
    ///
    /// Duplicate lines for the same product are summed before anything is
    /// read. On success the order, its lines and every stock decrement have
    /// been committed together.
    ///
    /// # Errors
    ///
    /// - [`PlaceOrderError::Validation`] when the request cannot be consolidated
    /// - [`PlaceOrderError::ProductNotFound`] when a line names an unknown product
    /// - [`PlaceOrderError::InsufficientStock`] when a line asks for more than is in stock
    /// - [`PlaceOrderError::ConcurrentModification`] when every attempt conflicted
    /// - [`PlaceOrderError::StoreUnavailable`] on any other store failure
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderId, PlaceOrderError> {
        self.run(request, None).await
    }

    /// Like [`place_order`](Self::place_order), but gives up with
    /// [`PlaceOrderError::DeadlineExceeded`] once `deadline` passes.
    ///
    /// The deadline covers staging and backoff. A commit that has already
    /// been issued runs to completion, so an order reported as failed was
    /// never persisted.
    ///
    /// # Errors
    ///
    /// Everything [`place_order`](Self::place_order) returns, plus
    /// [`PlaceOrderError::DeadlineExceeded`].
    pub async fn place_order_until(
        &self,
        request: &OrderRequest,
        deadline: Instant,
    ) -> Result<OrderId, PlaceOrderError> {
        self.run(request, Some(deadline)).await
    }

    async fn run(
        &self,
        request: &OrderRequest,
        deadline: Option<Instant>,
    ) -> Result<OrderId, PlaceOrderError> {
        let lines = request.consolidated()?;
        let max_attempts = self.retry_policy.max_attempts();
        let mut attempt = 1;

        loop {
            let phase = match self.attempt(&lines, deadline).await {
                Ok(order_id) => return Ok(order_id),
                Err(AttemptFailure::Aborted(error)) => return Err(error),
                Err(AttemptFailure::Conflict(phase)) => phase,
            };

            if attempt >= max_attempts {
                return Err(PlaceOrderError::ConcurrentModification { attempts: attempt });
            }
            attempt += 1;

            let delay = self.retry_policy.delay_before(attempt);
            if let Some(hook) = &self.metrics_hook {
                hook.on_retry_attempt(&RetryContext {
                    attempt,
                    max_attempts,
                    delay,
                    phase,
                });
            }
            backoff(delay, deadline).await?;
        }
    }

    async fn attempt(
        &self,
        lines: &BTreeMap<ProductId, Quantity>,
        deadline: Option<Instant>,
    ) -> Result<OrderId, AttemptFailure> {
        let (unit_of_work, order_id) = match deadline {
            Some(deadline) => {
                if deadline <= Instant::now() {
                    return Err(PlaceOrderError::DeadlineExceeded.into());
                }
                // Expiry drops the staged unit of work, which rolls it back.
                tokio::time::timeout_at(deadline, self.stage(lines))
                    .await
                    .map_err(|_| PlaceOrderError::DeadlineExceeded)??
            }
            None => self.stage(lines).await?,
        };

        unit_of_work
            .commit()
            .await
            .map_err(AttemptFailure::committing)?;
        Ok(order_id)
    }

    /// Everything up to, but not including, the commit.
    async fn stage(
        &self,
        lines: &BTreeMap<ProductId, Quantity>,
    ) -> Result<(S::UnitOfWork, OrderId), AttemptFailure> {
        let mut unit_of_work = self
            .store
            .begin()
            .await
            .map_err(AttemptFailure::validating)?;

        match reserve(&mut unit_of_work, lines).await {
            Ok(order_id) => Ok((unit_of_work, order_id)),
            Err(failure) => {
                // Dropping the unit of work discards it even if this fails.
                let _ = unit_of_work.rollback().await;
                Err(failure)
            }
        }
    }
}

async fn reserve<U>(
    unit_of_work: &mut U,
    lines: &BTreeMap<ProductId, Quantity>,
) -> Result<OrderId, AttemptFailure>
where
    U: UnitOfWork,
{
    let ids: Vec<ProductId> = lines.keys().copied().collect();
    let products = unit_of_work
        .get_products_for_update(&ids)
        .await
        .map_err(AttemptFailure::validating)?;

    let order_id = OrderId::generate();
    let mut order_lines = Vec::with_capacity(lines.len());
    for (&product_id, &requested) in lines {
        let product = products
            .get(&product_id)
            .ok_or(PlaceOrderError::ProductNotFound { product_id })?;

        if requested.into_inner() > product.stock_quantity {
            return Err(PlaceOrderError::InsufficientStock {
                product_id,
                requested,
                available: product.stock_quantity,
            }
            .into());
        }

        order_lines.push(OrderLine {
            order_id,
            product_id,
            quantity: requested,
            unit_price_at_purchase: product.unit_price,
        });
    }

    let placed = PlacedOrder::from_lines(order_id, Utc::now(), order_lines)
        .map_err(PlaceOrderError::from)?;

    for line in &placed.lines {
        unit_of_work
            .decrement_stock(line.product_id, line.quantity)
            .await
            .map_err(AttemptFailure::validating)?;
    }

    unit_of_work
        .insert_order(&placed)
        .await
        .map_err(AttemptFailure::validating)
}

async fn backoff(delay: Duration, deadline: Option<Instant>) -> Result<(), PlaceOrderError> {
    if let Some(deadline) = deadline {
        let past_deadline = Instant::now()
            .checked_add(delay)
            .is_none_or(|wake_at| wake_at >= deadline);
        if past_deadline {
            return Err(PlaceOrderError::DeadlineExceeded);
        }
    }

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(())
}
