//! Mapping of domain failures onto HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use storefront::{PlaceOrderError, StoreError, ValidationError};
use thiserror::Error;
use tracing::{error, warn};

use crate::api::ErrorResponse;

/// Anything a handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The body was not the JSON the endpoint expects.
    #[error(transparent)]
    MalformedBody(#[from] JsonRejection),

    /// The body parsed but describes an invalid order.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Order placement failed.
    #[error(transparent)]
    Placement(#[from] PlaceOrderError),

    /// A catalog read failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A catalog read did not finish before the request deadline.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl ApiError {
    /// Status code reported to the client.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MalformedBody(_)
            | Self::Validation(_)
            | Self::Placement(PlaceOrderError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Placement(PlaceOrderError::ProductNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Placement(
                PlaceOrderError::InsufficientStock { .. }
                | PlaceOrderError::ConcurrentModification { .. },
            ) => StatusCode::CONFLICT,
            Self::Placement(PlaceOrderError::DeadlineExceeded) | Self::DeadlineExceeded => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Self::Placement(PlaceOrderError::StoreUnavailable(_)) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "[http.request_failed] request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "[http.request_rejected] request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
