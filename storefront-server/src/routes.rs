//! Router, shared state and request handlers.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use storefront::{CatalogQuery, CatalogStore, OrderRequest, ReservationEngine, RetryPolicy};
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, Span};

use crate::api::{ErrorResponse, PlaceOrderRequest, PlaceOrderResponse, ProductView};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::telemetry::LoggingMetricsHook;

/// Body of `GET /health`.
pub const HEALTH_BODY: &str = "OK";

/// Services shared by every request.
#[derive(Debug, Clone)]
pub struct AppState<S> {
    catalog: CatalogQuery<S>,
    engine: ReservationEngine<S>,
    request_deadline: Duration,
}

impl<S> AppState<S>
where
    S: CatalogStore + Clone,
{
    /// Build the state around `store`. Placement retries are logged.
    ///
    /// `request_deadline` bounds both catalog listing and order placement.
    pub fn new(store: S, retry_policy: RetryPolicy, request_deadline: Duration) -> Self {
        Self {
            catalog: CatalogQuery::new(store.clone()),
            engine: ReservationEngine::new(store)
                .with_retry_policy(retry_policy)
                .with_metrics_hook(Arc::new(LoggingMetricsHook)),
            request_deadline,
        }
    }

    /// Build the state with the retry policy and deadline from `config`.
    pub fn from_config(store: S, config: &ServerConfig) -> Self {
        Self::new(
            store,
            config.retry_policy(),
            config.order_deadline.as_duration(),
        )
    }
}

/// The full HTTP application.
///
/// Every response carries an `x-request-id` header, taken from the request
/// when present and generated otherwise. Panicking handlers answer 500 with
/// the usual JSON error body.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: CatalogStore + Clone + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/products", get(list_products::<S>))
        .route("/orders", post(place_order::<S>))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(panic_response)),
        )
}

fn request_span(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    info_span!(
        "http.request",
        method = %request.method(),
        uri = %request.uri(),
        request_id
    )
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    error!(detail, "[http.handler_panicked] handler panicked");

    let body = ErrorResponse {
        error: "internal server error".to_string(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

async fn health() -> &'static str {
    HEALTH_BODY
}

async fn list_products<S>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<ProductView>>, ApiError>
where
    S: CatalogStore + Clone + 'static,
{
    let products = tokio::time::timeout(state.request_deadline, state.catalog.list_products())
        .await
        .map_err(|_| ApiError::DeadlineExceeded)??;
    Ok(Json(products.into_iter().map(ProductView::from).collect()))
}

async fn place_order<S>(
    State(state): State<AppState<S>>,
    body: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), ApiError>
where
    S: CatalogStore + Clone + 'static,
{
    let Json(body) = body?;
    let request = OrderRequest::try_from(body)?;
    let deadline = Instant::now() + state.request_deadline;

    let order_id = state.engine.place_order_until(&request, deadline).await?;

    info!(order_id = %order_id, "[http.order_placed] order placed");
    Ok((StatusCode::CREATED, Json(PlaceOrderResponse { order_id })))
}
