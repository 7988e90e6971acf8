use crate::store::{CatalogStore, StoreError};
use crate::types::Product;

/// Read-only view of the catalog.
#[derive(Debug, Clone)]
pub struct CatalogQuery<S> {
    store: S,
}

impl<S> CatalogQuery<S>
where
    S: CatalogStore,
{
    /// Query the catalog held by `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Every product in the catalog, ordered by id.
    ///
    /// No pagination and no retries: a store failure is returned as is.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] raised by the underlying store.
    pub async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let mut products = self.store.list_all_products().await?;
        products.sort_by_key(|product| product.id);
        Ok(products)
    }
}
