//! Behaviour every catalog store adapter must share.
//!
//! Each scenario seeds its own products through [`CatalogSeeder`] and only
//! asserts on rows it created, so the suite can run in parallel against a
//! shared database.

use std::fmt;

use chrono::Utc;
use storefront::{
    CatalogSeeder, CatalogStore, Decimal, LineItem, NewProduct, OrderId, OrderLine, OrderRequest,
    PlaceOrderError, PlacedOrder, Product, ProductId, Quantity, ReservationEngine, StoreError,
    UnitOfWork,
};
use tokio::task::JoinSet;

/// A contract scenario that did not hold.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(scenario: &'static str, operation: &'static str, error: StoreError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of a contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

fn price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn quantity(scenario: &'static str, value: u32) -> Result<Quantity, ContractTestFailure> {
    Quantity::try_new(value).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid quantity {value}: {error}"))
    })
}

async fn seed<S>(
    scenario: &'static str,
    store: &S,
    name: &str,
    unit_price: Decimal,
    stock: u32,
) -> Result<ProductId, ContractTestFailure>
where
    S: CatalogSeeder,
{
    store
        .add_product(NewProduct::new(
            format!("{scenario}-{name}"),
            unit_price,
            stock,
        ))
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "add_product", error))
}

async fn product<S>(
    scenario: &'static str,
    store: &S,
    product_id: ProductId,
) -> Result<Product, ContractTestFailure>
where
    S: CatalogStore,
{
    store
        .list_all_products()
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "list_all_products", error))?
        .into_iter()
        .find(|product| product.id == product_id)
        .ok_or_else(|| {
            ContractTestFailure::assertion(
                scenario,
                format!("product {product_id} missing from listing"),
            )
        })
}

async fn expect_stock<S>(
    scenario: &'static str,
    store: &S,
    product_id: ProductId,
    expected: u32,
) -> ContractTestResult
where
    S: CatalogStore,
{
    let observed = product(scenario, store, product_id).await?.stock_quantity;
    if observed != expected {
        return Err(ContractTestFailure::assertion(
            scenario,
            format!("expected stock {expected} for product {product_id}, observed {observed}"),
        ));
    }
    Ok(())
}

fn single_line_order(
    scenario: &'static str,
    product_id: ProductId,
    amount: Quantity,
    unit_price: Decimal,
) -> Result<PlacedOrder, ContractTestFailure> {
    let order_id = OrderId::generate();
    PlacedOrder::from_lines(
        order_id,
        Utc::now(),
        vec![OrderLine {
            order_id,
            product_id,
            quantity: amount,
            unit_price_at_purchase: unit_price,
        }],
    )
    .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))
}

/// Stage a decrement and an order for `amount` units inside a fresh unit of work.
async fn stage_purchase<S>(
    scenario: &'static str,
    store: &S,
    product_id: ProductId,
    amount: Quantity,
) -> Result<(S::UnitOfWork, PlacedOrder), ContractTestFailure>
where
    S: CatalogStore,
{
    let mut unit_of_work = store
        .begin()
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "begin", error))?;

    let locked = unit_of_work
        .get_products_for_update(&[product_id])
        .await
        .map_err(|error| {
            ContractTestFailure::store_error(scenario, "get_products_for_update", error)
        })?;
    let unit_price = locked
        .get(&product_id)
        .map(|product| product.unit_price)
        .ok_or_else(|| {
            ContractTestFailure::assertion(scenario, "locked snapshot is missing the product")
        })?;

    unit_of_work
        .decrement_stock(product_id, amount)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "decrement_stock", error))?;

    let order = single_line_order(scenario, product_id, amount, unit_price)?;
    let _ = unit_of_work
        .insert_order(&order)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "insert_order", error))?;

    Ok((unit_of_work, order))
}

async fn expect_no_order<S>(
    scenario: &'static str,
    store: &S,
    order_id: OrderId,
) -> ContractTestResult
where
    S: CatalogStore,
{
    let found = store
        .find_order(order_id)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "find_order", error))?;
    if found.is_some() {
        return Err(ContractTestFailure::assertion(
            scenario,
            format!("order {order_id} is visible although it was never committed"),
        ));
    }
    Ok(())
}

/// Seeded products are listed with their attributes, in ascending id order.
pub async fn test_listing_returns_products_in_id_order<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "listing_returns_products_in_id_order";

    let store = make_store();
    let mug = seed(SCENARIO, &store, "mug", price(1000), 5).await?;
    let pen = seed(SCENARIO, &store, "pen", price(150), 9).await?;

    let listing = store
        .list_all_products()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "list_all_products", error))?;

    if !listing.windows(2).all(|pair| pair[0].id < pair[1].id) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "listing is not strictly ordered by product id",
        ));
    }

    let listed_mug = product(SCENARIO, &store, mug).await?;
    if listed_mug.unit_price != price(1000) || listed_mug.stock_quantity != 5 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("seeded product came back altered: {listed_mug:?}"),
        ));
    }
    let _ = product(SCENARIO, &store, pen).await?;

    Ok(())
}

/// A committed unit of work publishes its decrements and its order together.
pub async fn test_commit_publishes_every_change<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "commit_publishes_every_change";

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "mug", price(1000), 5).await?;
    let (unit_of_work, order) =
        stage_purchase(SCENARIO, &store, product_id, quantity(SCENARIO, 3)?).await?;

    unit_of_work
        .commit()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "commit", error))?;

    expect_stock(SCENARIO, &store, product_id, 2).await?;
    let found = store
        .find_order(order.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_order", error))?;
    if found.as_ref() != Some(&order) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected committed order {order:?}, observed {found:?}"),
        ));
    }

    Ok(())
}

/// An explicit rollback discards every change of the unit of work.
pub async fn test_rollback_discards_every_change<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "rollback_discards_every_change";

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "mug", price(1000), 5).await?;
    let (unit_of_work, order) =
        stage_purchase(SCENARIO, &store, product_id, quantity(SCENARIO, 3)?).await?;

    unit_of_work
        .rollback()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "rollback", error))?;

    expect_stock(SCENARIO, &store, product_id, 5).await?;
    expect_no_order(SCENARIO, &store, order.id()).await
}

/// Dropping an uncommitted unit of work behaves like a rollback.
pub async fn test_drop_discards_every_change<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "drop_discards_every_change";

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "mug", price(1000), 5).await?;
    let (unit_of_work, order) =
        stage_purchase(SCENARIO, &store, product_id, quantity(SCENARIO, 3)?).await?;

    drop(unit_of_work);

    expect_stock(SCENARIO, &store, product_id, 5).await?;
    expect_no_order(SCENARIO, &store, order.id()).await
}

/// Stock never goes negative: an oversized decrement is reported as a conflict.
pub async fn test_decrement_below_zero_conflicts<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "decrement_below_zero_conflicts";

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "mug", price(1000), 2).await?;

    let mut unit_of_work = store
        .begin()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "begin", error))?;
    let result = unit_of_work
        .decrement_stock(product_id, quantity(SCENARIO, 3)?)
        .await;
    drop(unit_of_work);

    match result {
        Err(error) if error.is_conflict() => {}
        other => {
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                format!("expected a conflict, observed {other:?}"),
            ))
        }
    }

    expect_stock(SCENARIO, &store, product_id, 2).await
}

/// Locking reports only the products that exist.
pub async fn test_lock_omits_missing_products<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "lock_omits_missing_products";

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "mug", price(1000), 2).await?;
    let missing = ProductId::try_new(i64::MAX).map_err(|error| {
        ContractTestFailure::assertion(SCENARIO, format!("invalid product id: {error}"))
    })?;

    let mut unit_of_work = store
        .begin()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "begin", error))?;
    let locked = unit_of_work
        .get_products_for_update(&[product_id, missing])
        .await
        .map_err(|error| {
            ContractTestFailure::store_error(SCENARIO, "get_products_for_update", error)
        })?;
    unit_of_work
        .rollback()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "rollback", error))?;

    if locked.len() != 1 || !locked.contains_key(&product_id) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected only product {product_id} to be locked, observed {locked:?}"),
        ));
    }
    Ok(())
}

/// Concurrent placements for the last unit sell it exactly once.
pub async fn test_last_unit_is_sold_once<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder + Clone + 'static,
{
    const SCENARIO: &str = "last_unit_is_sold_once";
    const CUSTOMERS: usize = 8;

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "last-mug", price(1000), 1).await?;
    let line = LineItem::new(product_id, quantity(SCENARIO, 1)?);
    let request = OrderRequest::try_new(vec![line])
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;

    let engine = ReservationEngine::new(store.clone());
    let mut placements = JoinSet::new();
    for _ in 0..CUSTOMERS {
        let engine = engine.clone();
        let request = request.clone();
        let _ = placements.spawn(async move { engine.place_order(&request).await });
    }

    let mut placed = 0;
    while let Some(joined) = placements.join_next().await {
        match joined {
            Ok(Ok(_)) => placed += 1,
            Ok(Err(
                PlaceOrderError::InsufficientStock { .. }
                | PlaceOrderError::ConcurrentModification { .. },
            )) => {}
            Ok(Err(other)) => {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("unexpected placement failure: {other}"),
                ))
            }
            Err(join_error) => {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("placement task failed: {join_error}"),
                ))
            }
        }
    }

    if placed != 1 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly one successful placement, observed {placed}"),
        ));
    }
    expect_stock(SCENARIO, &store, product_id, 0).await
}

/// Repricing a product never changes orders that were already placed.
pub async fn test_repricing_preserves_placed_orders<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: CatalogStore + CatalogSeeder,
{
    const SCENARIO: &str = "repricing_preserves_placed_orders";

    let store = make_store();
    let product_id = seed(SCENARIO, &store, "mug", price(1000), 5).await?;
    let (unit_of_work, order) =
        stage_purchase(SCENARIO, &store, product_id, quantity(SCENARIO, 3)?).await?;
    unit_of_work
        .commit()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "commit", error))?;

    store
        .reprice_product(product_id, price(9999))
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "reprice_product", error))?;

    let found = store
        .find_order(order.id())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_order", error))?
        .ok_or_else(|| ContractTestFailure::assertion(SCENARIO, "committed order vanished"))?;

    if found.order.total != price(3000)
        || found
            .lines
            .iter()
            .any(|line| line.unit_price_at_purchase != price(1000))
    {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("placed order changed after repricing: {found:?}"),
        ));
    }
    if product(SCENARIO, &store, product_id).await?.unit_price != price(9999) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "catalog price was not updated",
        ));
    }
    Ok(())
}

/// Generate one `#[tokio::test]` per contract scenario for a store factory.
///
/// ```ignore
/// storefront_testing::contract::catalog_store_contract_tests! {
///     suite = memory,
///     make_store = || storefront_memory::InMemoryCatalogStore::new(),
/// }
/// ```
#[macro_export]
macro_rules! catalog_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        mod $suite {
            use $crate::contract::{
                test_commit_publishes_every_change, test_decrement_below_zero_conflicts,
                test_drop_discards_every_change, test_last_unit_is_sold_once,
                test_listing_returns_products_in_id_order, test_lock_omits_missing_products,
                test_repricing_preserves_placed_orders, test_rollback_discards_every_change,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn listing_returns_products_in_id_order_contract() {
                test_listing_returns_products_in_id_order($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn commit_publishes_every_change_contract() {
                test_commit_publishes_every_change($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn rollback_discards_every_change_contract() {
                test_rollback_discards_every_change($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn drop_discards_every_change_contract() {
                test_drop_discards_every_change($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn decrement_below_zero_conflicts_contract() {
                test_decrement_below_zero_conflicts($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn lock_omits_missing_products_contract() {
                test_lock_omits_missing_products($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn last_unit_is_sold_once_contract() {
                test_last_unit_is_sold_once($make_store)
                    .await
                    .expect("catalog store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn repricing_preserves_placed_orders_contract() {
                test_repricing_preserves_placed_orders($make_store)
                    .await
                    .expect("catalog store contract failed");
            }
        }
    };
}

pub use catalog_store_contract_tests;
