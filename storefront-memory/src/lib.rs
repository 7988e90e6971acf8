//! In-memory catalog store for the storefront service.
//!
//! Implements the [`CatalogStore`] family of traits from `storefront` without
//! any external infrastructure. Concurrency control is optimistic: a unit of
//! work records the version of every product it reads and its commit fails
//! with [`StoreError::Conflict`] if any of them changed in the meantime.
//!
//! The state lock is only ever held for the duration of a synchronous
//! section, never across an `.await`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use storefront::{
    CatalogSeeder, CatalogStore, Decimal, NewProduct, Operation, OrderId, PlacedOrder, Product,
    ProductId, Quantity, StoreError, UnitOfWork,
};
use tracing::debug;

#[derive(Debug, Clone)]
struct VersionedProduct {
    product: Product,
    version: u64,
}

#[derive(Debug)]
struct CatalogState {
    products: BTreeMap<ProductId, VersionedProduct>,
    orders: HashMap<OrderId, PlacedOrder>,
    next_product_id: i64,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            products: BTreeMap::new(),
            orders: HashMap::new(),
            next_product_id: 1,
        }
    }
}

impl CatalogState {
    fn insert_product(&mut self, new_product: NewProduct) -> Result<ProductId, StoreError> {
        let id = ProductId::try_new(self.next_product_id).map_err(|error| {
            StoreError::InvalidRecord {
                operation: Operation::AddProduct,
                detail: error.to_string(),
            }
        })?;
        self.next_product_id += 1;

        let _ = self.products.insert(
            id,
            VersionedProduct {
                product: Product {
                    id,
                    name: new_product.name,
                    unit_price: new_product.unit_price,
                    stock_quantity: new_product.stock_quantity,
                },
                version: 0,
            },
        );
        Ok(id)
    }
}

/// Thread-safe in-memory catalog and order store.
///
/// Clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryCatalogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `products`, assigned ids 1, 2, 3, ...
    /// in iteration order.
    pub fn with_products(
        products: impl IntoIterator<Item = NewProduct>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for product in products {
                let _ = state.insert_product(product)?;
            }
        }
        Ok(store)
    }

    /// Number of committed orders.
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    /// Current stock of a product, if it exists.
    pub fn stock_of(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .lock()
            .products
            .get(&product_id)
            .map(|entry| entry.product.stock_quantity)
    }
}

impl CatalogStore for InMemoryCatalogStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError> {
        Ok(InMemoryUnitOfWork {
            state: Arc::clone(&self.state),
            read_versions: HashMap::new(),
            snapshot: HashMap::new(),
            decrements: BTreeMap::new(),
            orders: Vec::new(),
        })
    }

    async fn list_all_products(&self) -> Result<Vec<Product>, StoreError> {
        let state = self.state.lock();
        Ok(state
            .products
            .values()
            .map(|entry| entry.product.clone())
            .collect())
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<PlacedOrder>, StoreError> {
        Ok(self.state.lock().orders.get(&order_id).cloned())
    }
}

impl CatalogSeeder for InMemoryCatalogStore {
    async fn add_product(&self, product: NewProduct) -> Result<ProductId, StoreError> {
        self.state.lock().insert_product(product)
    }

    async fn reprice_product(
        &self,
        product_id: ProductId,
        unit_price: Decimal,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let entry = state
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductMissing {
                operation: Operation::RepriceProduct,
                product_id,
            })?;
        entry.product.unit_price = unit_price;
        entry.version += 1;
        Ok(())
    }
}

/// A buffered unit of work against an [`InMemoryCatalogStore`].
///
/// Nothing is written to the shared state until [`UnitOfWork::commit`];
/// dropping the handle discards every buffered change.
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    state: Arc<Mutex<CatalogState>>,
    read_versions: HashMap<ProductId, u64>,
    // Products as this unit of work sees them, staged decrements applied.
    snapshot: HashMap<ProductId, Product>,
    decrements: BTreeMap<ProductId, u32>,
    orders: Vec<PlacedOrder>,
}

impl InMemoryUnitOfWork {
    /// Record a product's current version and cache it, unless already read.
    fn track(&mut self, state: &CatalogState, product_id: ProductId) -> Option<Product> {
        if let Some(product) = self.snapshot.get(&product_id) {
            return Some(product.clone());
        }
        let entry = state.products.get(&product_id)?;
        let _ = self.read_versions.insert(product_id, entry.version);
        let _ = self.snapshot.insert(product_id, entry.product.clone());
        Some(entry.product.clone())
    }
}

impl UnitOfWork for InMemoryUnitOfWork {
    async fn get_products_for_update(
        &mut self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, StoreError> {
        let state = Arc::clone(&self.state);
        let state = state.lock();
        Ok(ids
            .iter()
            .filter_map(|&id| self.track(&state, id).map(|product| (id, product)))
            .collect())
    }

    async fn decrement_stock(
        &mut self,
        product_id: ProductId,
        amount: Quantity,
    ) -> Result<(), StoreError> {
        let state = Arc::clone(&self.state);
        if self.track(&state.lock(), product_id).is_none() {
            return Err(StoreError::ProductMissing {
                operation: Operation::DecrementStock,
                product_id,
            });
        }

        let amount = amount.into_inner();
        let product = self
            .snapshot
            .get_mut(&product_id)
            .ok_or(StoreError::ProductMissing {
                operation: Operation::DecrementStock,
                product_id,
            })?;
        product.stock_quantity = product
            .stock_quantity
            .checked_sub(amount)
            .ok_or(StoreError::Conflict {
                operation: Operation::DecrementStock,
            })?;
        *self.decrements.entry(product_id).or_insert(0) += amount;
        Ok(())
    }

    async fn insert_order(&mut self, order: &PlacedOrder) -> Result<OrderId, StoreError> {
        let state = self.state.lock();
        if state.orders.contains_key(&order.id())
            || self.orders.iter().any(|staged| staged.id() == order.id())
        {
            return Err(StoreError::InvalidRecord {
                operation: Operation::InsertOrder,
                detail: format!("order {} already exists", order.id()),
            });
        }
        if let Some(line) = order
            .lines
            .iter()
            .find(|line| !state.products.contains_key(&line.product_id))
        {
            return Err(StoreError::ProductMissing {
                operation: Operation::InsertOrder,
                product_id: line.product_id,
            });
        }
        drop(state);

        self.orders.push(order.clone());
        Ok(order.id())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.state.lock();

        let stale = self.read_versions.iter().find(|&(id, version)| {
            state
                .products
                .get(id)
                .is_none_or(|entry| entry.version != *version)
        });
        if let Some((product_id, _)) = stale {
            debug!(
                product_id = %product_id,
                "[memory.version_conflict] product changed since it was read"
            );
            return Err(StoreError::Conflict {
                operation: Operation::Commit,
            });
        }

        for (product_id, amount) in &self.decrements {
            let entry = state
                .products
                .get_mut(product_id)
                .ok_or(StoreError::ProductMissing {
                    operation: Operation::Commit,
                    product_id: *product_id,
                })?;
            entry.product.stock_quantity = entry
                .product
                .stock_quantity
                .checked_sub(*amount)
                .ok_or(StoreError::Conflict {
                    operation: Operation::Commit,
                })?;
            entry.version += 1;
        }

        for order in self.orders {
            let _ = state.orders.insert(order.id(), order);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
