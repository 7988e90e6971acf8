//! Fault injection for catalog stores.
//!
//! [`ChaosCatalogStore`] wraps any [`CatalogStore`] and, with configurable
//! probabilities, fails operations as if the store were unreachable or makes
//! commits conflict as if a concurrent writer had won. Use it to drive the
//! engine's retry and error paths against a real adapter.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use storefront::{
    CatalogSeeder, CatalogStore, Decimal, NewProduct, Operation, OrderId, PlacedOrder, Product,
    ProductId, Quantity, StoreError, UnitOfWork,
};

/// Probability value for chaos injection rates, in `[0.0, 1.0]`.
///
/// 0.0 never injects, 1.0 always does.
///
/// ```ignore
/// use storefront_testing::chaos::Probability;
///
/// assert!(Probability::try_new(0.5).is_ok());
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    default = 0.0,
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Default, Into)
)]
pub struct Probability(f32);

impl Probability {
    fn clamped(value: f32) -> Self {
        Self::try_new(value.clamp(0.0, 1.0)).unwrap_or_default()
    }
}

/// Which faults to inject and how often.
#[derive(Debug, Clone, Default)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    conflict_probability: Probability,
}

impl ChaosConfig {
    /// Configuration with a fixed RNG seed, so runs are reproducible.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Chance that an operation fails with [`StoreError::Unavailable`].
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::clamped(probability);
        self
    }

    /// Chance that a commit fails with [`StoreError::Conflict`].
    #[must_use]
    pub fn with_conflict_probability(mut self, probability: f32) -> Self {
        self.conflict_probability = Probability::clamped(probability);
        self
    }
}

/// Extension to wrap a store in chaos.
pub trait ChaosCatalogStoreExt: Sized {
    /// Wrap `self` in a [`ChaosCatalogStore`] using `config`.
    fn with_chaos(self, config: ChaosConfig) -> ChaosCatalogStore<Self>;
}

impl<S> ChaosCatalogStoreExt for S
where
    S: CatalogStore,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosCatalogStore<Self> {
        ChaosCatalogStore::new(self, config)
    }
}

#[derive(Debug)]
struct Injector {
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl Injector {
    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();

        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(probability))
    }

    fn should_fail(&self) -> bool {
        self.should_inject(self.config.failure_probability)
    }

    fn should_conflict(&self) -> bool {
        self.should_inject(self.config.conflict_probability)
    }
}

/// A [`CatalogStore`] that injects faults before delegating.
///
/// Clones share the same RNG, so a deterministic configuration stays
/// reproducible across clones.
#[derive(Debug, Clone)]
pub struct ChaosCatalogStore<S> {
    store: S,
    injector: Arc<Injector>,
}

impl<S> ChaosCatalogStore<S> {
    /// Wrap `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            injector: Arc::new(Injector {
                config,
                rng: Mutex::new(rng),
            }),
        }
    }

    /// The wrapped store, for fault-free verification reads.
    pub const fn inner(&self) -> &S {
        &self.store
    }
}

impl<S> CatalogStore for ChaosCatalogStore<S>
where
    S: CatalogStore,
{
    type UnitOfWork = ChaosUnitOfWork<S::UnitOfWork>;

    fn begin(&self) -> impl Future<Output = Result<Self::UnitOfWork, StoreError>> + Send {
        let should_fail = self.injector.should_fail();
        let injector = Arc::clone(&self.injector);
        let store = &self.store;

        async move {
            if should_fail {
                return Err(StoreError::Unavailable {
                    operation: Operation::Begin,
                });
            }

            let inner = store.begin().await?;
            Ok(ChaosUnitOfWork { inner, injector })
        }
    }

    fn list_all_products(&self) -> impl Future<Output = Result<Vec<Product>, StoreError>> + Send {
        let should_fail = self.injector.should_fail();
        let store = &self.store;

        async move {
            if should_fail {
                return Err(StoreError::Unavailable {
                    operation: Operation::ListProducts,
                });
            }

            store.list_all_products().await
        }
    }

    fn find_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<PlacedOrder>, StoreError>> + Send {
        let should_fail = self.injector.should_fail();
        let store = &self.store;

        async move {
            if should_fail {
                return Err(StoreError::Unavailable {
                    operation: Operation::FindOrder,
                });
            }

            store.find_order(order_id).await
        }
    }
}

impl<S> CatalogSeeder for ChaosCatalogStore<S>
where
    S: CatalogSeeder,
{
    // Provisioning is never disturbed.
    fn add_product(
        &self,
        product: NewProduct,
    ) -> impl Future<Output = Result<ProductId, StoreError>> + Send {
        self.store.add_product(product)
    }

    fn reprice_product(
        &self,
        product_id: ProductId,
        unit_price: Decimal,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.store.reprice_product(product_id, unit_price)
    }
}

/// Unit of work handed out by [`ChaosCatalogStore`].
#[derive(Debug)]
pub struct ChaosUnitOfWork<U> {
    inner: U,
    injector: Arc<Injector>,
}

impl<U> UnitOfWork for ChaosUnitOfWork<U>
where
    U: UnitOfWork,
{
    fn get_products_for_update(
        &mut self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<HashMap<ProductId, Product>, StoreError>> + Send {
        let should_fail = self.injector.should_fail();
        let inner = &mut self.inner;

        async move {
            if should_fail {
                return Err(StoreError::Unavailable {
                    operation: Operation::LockProducts,
                });
            }

            inner.get_products_for_update(ids).await
        }
    }

    fn decrement_stock(
        &mut self,
        product_id: ProductId,
        amount: Quantity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.decrement_stock(product_id, amount)
    }

    fn insert_order(
        &mut self,
        order: &PlacedOrder,
    ) -> impl Future<Output = Result<OrderId, StoreError>> + Send {
        self.inner.insert_order(order)
    }

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send {
        let should_conflict = self.injector.should_conflict();
        let should_fail = self.injector.should_fail();
        let inner = self.inner;

        async move {
            if should_conflict || should_fail {
                let _ = inner.rollback().await;
                return Err(if should_conflict {
                    StoreError::Conflict {
                        operation: Operation::Commit,
                    }
                } else {
                    StoreError::Unavailable {
                        operation: Operation::Commit,
                    }
                });
            }

            inner.commit().await
        }
    }

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.inner.rollback()
    }
}
