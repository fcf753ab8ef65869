//! Error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::MarketplaceError;

/// Handler error: a `MarketplaceError` rendered as `{"error": {...}}`.
#[derive(Debug)]
pub struct ApiError(pub MarketplaceError);

impl From<MarketplaceError> for ApiError {
    fn from(e: MarketplaceError) -> Self { Self(e) }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self { Self(e.into()) }
}

pub fn status_for(err: &MarketplaceError) -> StatusCode {
    match err {
        MarketplaceError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        MarketplaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        MarketplaceError::OutOfStock { .. } | MarketplaceError::InsufficientStock { .. } => StatusCode::CONFLICT,
        MarketplaceError::CouponIneligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
        MarketplaceError::DifferentStore { .. } => StatusCode::CONFLICT,
        MarketplaceError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
        MarketplaceError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        MarketplaceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn details(err: &MarketplaceError) -> Value {
    match err {
        MarketplaceError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
        MarketplaceError::OutOfStock { item, requested, available } => {
            json!({ "item": item, "requested": requested, "available": available })
        }
        MarketplaceError::InsufficientStock { target, requested } => json!({ "target": target, "requested": requested }),
        MarketplaceError::DifferentStore { current, requested } => json!({ "current_store": current, "requested_store": requested }),
        _ => Value::Null,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        let code = match &err {
            MarketplaceError::CouponIneligible(reason) => reason.code(),
            other => other.kind(),
        };
        let message = match &err {
            MarketplaceError::Storage(cause) => {
                tracing::error!(error = %cause, "Storage failure");
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "error": {
                "kind": err.kind(),
                "code": code,
                "message": message,
                "fields": err.fields(),
                "details": details(&err),
            }
        });
        (status, Json(body)).into_response()
    }
}
