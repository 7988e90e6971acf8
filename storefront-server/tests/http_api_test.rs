use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront::{
    CatalogStore, MaxAttempts, NewProduct, OrderId, PlacedOrder, Product, ProductId,
    RetryPolicy, StoreError,
};
use storefront_memory::InMemoryCatalogStore;
use storefront_server::routes::HEALTH_BODY;
use storefront_server::{router, AppState};
use storefront_testing::chaos::{ChaosCatalogStoreExt, ChaosConfig};
use tower::ServiceExt;

fn seeded_store() -> InMemoryCatalogStore {
    InMemoryCatalogStore::with_products([
        NewProduct::new("Mug", dec!(10.00), 5),
        NewProduct::new("Pen", dec!(1.50), 2),
    ])
    .expect("seeding should succeed")
}

fn app<S>(store: S) -> Router
where
    S: CatalogStore + Clone + 'static,
{
    router(AppState::new(
        store,
        RetryPolicy::immediate(MaxAttempts::default()),
        Duration::from_secs(5),
    ))
}

fn post_order(body: &Value) -> Request<Body> {
    Request::post("/orders")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .body(Body::empty())
        .expect("request should build")
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes()
        .to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body should be JSON")
}

#[tokio::test]
async fn health_answers_plain_text() {
    let response = app(seeded_store())
        .oneshot(get("/health"))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"), "{content_type}");
    assert_eq!(body_bytes(response).await, HEALTH_BODY.as_bytes());
}

#[tokio::test]
async fn products_are_listed_in_id_order() {
    let response = app(seeded_store())
        .oneshot(get("/products"))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([
            {"id": 1, "name": "Mug", "unit_price": "10.00", "stock_quantity": 5},
            {"id": 2, "name": "Pen", "unit_price": "1.50", "stock_quantity": 2}
        ])
    );
}

#[tokio::test]
async fn placed_order_returns_created_with_its_id() {
    // Given
    let store = seeded_store();

    // When: three mugs are ordered
    let response = app(store.clone())
        .oneshot(post_order(&json!({"items": [{"product_id": 1, "quantity": 3}]})))
        .await
        .expect("request should complete");

    // Then
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let order_id: OrderId =
        serde_json::from_value(body["order_id"].clone()).expect("order id should parse");
    let placed = store
        .find_order(order_id)
        .await
        .expect("lookup should succeed")
        .expect("order should exist");
    assert_eq!(placed.order.total, dec!(30.00));
    assert_eq!(
        store.stock_of(ProductId::try_new(1).expect("valid id")),
        Some(2)
    );
}

#[tokio::test]
async fn insufficient_stock_is_a_conflict() {
    let store = seeded_store();

    let response = app(store.clone())
        .oneshot(post_order(&json!({"items": [{"product_id": 2, "quantity": 3}]})))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    let message = body["error"].as_str().unwrap_or_default();
    assert!(message.contains("insufficient stock"), "{message}");
    assert_eq!(store.order_count(), 0);
}

#[tokio::test]
async fn unknown_product_is_not_found() {
    let response = app(seeded_store())
        .oneshot(post_order(&json!({"items": [{"product_id": 999, "quantity": 1}]})))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn invalid_bodies_are_bad_requests() {
    let cases = [
        json!({"items": []}),
        json!({"items": [{"product_id": 1, "quantity": 0}]}),
        json!({"items": [{"product_id": 1, "quantity": -2}]}),
        json!({"items": [{"product_id": 0, "quantity": 1}]}),
        json!({"lines": []}),
    ];

    for body in cases {
        let response = app(seeded_store())
            .oneshot(post_order(&body))
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert!(json_body(response).await["error"].is_string());
    }
}

#[tokio::test]
async fn unparseable_json_is_a_bad_request() {
    let request = Request::post("/orders")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request should build");

    let response = app(seeded_store())
        .oneshot(request)
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn catalog_outage_is_a_server_error() {
    let store =
        seeded_store().with_chaos(ChaosConfig::deterministic().with_failure_probability(1.0));

    let response = app(store)
        .oneshot(get("/products"))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn exhausted_retries_are_a_conflict() {
    let store =
        seeded_store().with_chaos(ChaosConfig::deterministic().with_conflict_probability(1.0));

    let response = app(store)
        .oneshot(post_order(&json!({"items": [{"product_id": 1, "quantity": 1}]})))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn overrunning_the_deadline_is_a_gateway_timeout() {
    // Given: every commit conflicts and each retry would wait a full second
    let store =
        seeded_store().with_chaos(ChaosConfig::deterministic().with_conflict_probability(1.0));
    let app = router(AppState::new(
        store,
        RetryPolicy::default()
            .with_base_delay(Duration::from_secs(1))
            .without_jitter(),
        Duration::from_millis(100),
    ));

    // When
    let response = app
        .oneshot(post_order(&json!({"items": [{"product_id": 1, "quantity": 1}]})))
        .await
        .expect("request should complete");

    // Then
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn request_id_is_propagated_or_generated() {
    let request = Request::get("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .expect("request should build");

    let echoed = app(seeded_store())
        .oneshot(request)
        .await
        .expect("request should complete");
    let generated = app(seeded_store())
        .oneshot(get("/health"))
        .await
        .expect("request should complete");

    assert_eq!(
        echoed
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("req-123")
    );
    assert!(generated.headers().contains_key("x-request-id"));
}

/// A store whose listing panics.
#[derive(Debug, Clone)]
struct PanickingStore {
    inner: InMemoryCatalogStore,
}

impl CatalogStore for PanickingStore {
    type UnitOfWork = <InMemoryCatalogStore as CatalogStore>::UnitOfWork;

    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError> {
        self.inner.begin().await
    }

    async fn list_all_products(&self) -> Result<Vec<Product>, StoreError> {
        panic!("listing exploded")
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<PlacedOrder>, StoreError> {
        self.inner.find_order(order_id).await
    }
}

#[tokio::test]
async fn panicking_handler_answers_internal_server_error() {
    let response = app(PanickingStore {
        inner: seeded_store(),
    })
    .oneshot(get("/products"))
    .await
    .expect("request should complete");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE),
        Some(&header::HeaderValue::from_static("application/json"))
    );
    let body = json_body(response).await;
    assert_eq!(body["error"], "internal server error");
}

/// A store whose listing outlasts any reasonable deadline.
#[derive(Debug, Clone)]
struct StalledListingStore {
    inner: InMemoryCatalogStore,
}

impl CatalogStore for StalledListingStore {
    type UnitOfWork = <InMemoryCatalogStore as CatalogStore>::UnitOfWork;

    async fn begin(&self) -> Result<Self::UnitOfWork, StoreError> {
        self.inner.begin().await
    }

    async fn list_all_products(&self) -> Result<Vec<Product>, StoreError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.inner.list_all_products().await
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<PlacedOrder>, StoreError> {
        self.inner.find_order(order_id).await
    }
}

#[tokio::test]
async fn stalled_catalog_listing_is_a_gateway_timeout() {
    // Given: listing never finishes within the request deadline
    let app = router(AppState::new(
        StalledListingStore {
            inner: seeded_store(),
        },
        RetryPolicy::immediate(MaxAttempts::default()),
        Duration::from_millis(100),
    ));

    // When
    let response = app
        .oneshot(get("/products"))
        .await
        .expect("request should complete");

    // Then
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(json_body(response).await["error"].is_string());
}
