//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//! Every error is rendered as the JSON envelope
//! `{"success": false, "error": {"message", "code", "details"?}}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use kelp_core::OrderNumber;

use crate::db::RepositoryError;
use crate::models::{ApiErrorBody, ApiResponse, FieldError, Order};
use crate::payments::{GatewayError, SignatureError};
use crate::services::{CartError, CheckoutError, NotificationError, ReconcileError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout details failed validation.
    #[error("Validation failed: {} field error(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Webhook authentication failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] SignatureError),

    /// Webhook came from an address the provider does not use.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Order number could not be allocated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Payment provider failed. Carries the order when it was already
    /// created so the client can retry payment.
    #[error("Gateway error: {source}")]
    Gateway {
        source: GatewayError,
        order: Option<(String, OrderNumber)>,
    },

    /// Confirmation email could not be sent.
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(RepositoryError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// A gateway failure for an order that has already been stored.
    #[must_use]
    pub fn gateway_for(order: &Order, source: GatewayError) -> Self {
        Self::Gateway {
            source,
            order: Some((order.id.to_string(), order.order_number.clone())),
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OrderNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gateway { .. } => StatusCode::BAD_GATEWAY,
            Self::Notification(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "ORDER_NUMBER_CONFLICT",
            Self::Gateway { .. } => "PAYMENT_GATEWAY_ERROR",
            Self::Notification(_) => "EMAIL_SEND_ERROR",
            Self::Database(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Gateway { .. } | Self::Notification(_) | Self::Database(_) | Self::Internal(_)
        )
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::OrderNotFound("Order not found".to_owned()),
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Database(other),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Invalid(errors) => Self::Validation(errors),
            CheckoutError::Repository(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::AmountMismatch { .. } => Self::BadRequest(err.to_string()),
            ReconcileError::Repository(e) => e.into(),
        }
    }
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(source: GatewayError) -> Self {
        Self::Gateway {
            source,
            order: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = self.status();
        let code = self.code().to_owned();

        // Don't expose internal error details to clients
        let (message, details) = match self {
            Self::Validation(errors) => (
                "Invalid checkout details".to_owned(),
                Some(json!(errors)),
            ),
            Self::Unauthorized(_) => ("Invalid signature".to_owned(), None),
            Self::Forbidden(_) => ("Invalid source".to_owned(), None),
            Self::Conflict(_) => (
                "Could not allocate an order number, please try again".to_owned(),
                None,
            ),
            Self::Gateway { order, .. } => (
                "Payment provider unavailable, please try again".to_owned(),
                order.map(|(id, number)| json!({ "orderId": id, "orderNumber": number })),
            ),
            Self::Notification(_) => ("Failed to send confirmation email".to_owned(), None),
            Self::Database(_) | Self::Internal(_) => ("Internal server error".to_owned(), None),
            Self::BadRequest(msg) | Self::OrderNotFound(msg) | Self::NotFound(msg) => (msg, None),
        };

        let body = ApiResponse::failure(ApiErrorBody {
            message,
            code,
            details,
        });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for order actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_owned()),
        message: Some(message.to_owned()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_owned(),
            serde_json::Value::String((*value).to_owned()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use kelp_core::PaymentMethod;

    async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product-123".to_owned());
        assert_eq!(err.to_string(), "Not found: product-123");

        let err = AppError::BadRequest("invalid input".to_owned());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[tokio::test]
    async fn test_validation_envelope() {
        let (status, json) = body(AppError::Validation(vec![FieldError::new(
            "email",
            "Please enter a valid email",
        )]))
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["details"][0]["field"], "email");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, json) = body(AppError::Internal("pool exhausted at 10.0.0.3".to_owned())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "Internal server error");
        assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_gateway_error_carries_order() {
        let order = crate::models::order::fixtures::order(PaymentMethod::Stripe);
        let err = AppError::gateway_for(&order, GatewayError::NotConfigured(PaymentMethod::Stripe));
        let (status, json) = body(err).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["code"], "PAYMENT_GATEWAY_ERROR");
        assert_eq!(json["error"]["details"]["orderNumber"], order.order_number.as_str());
        assert_eq!(json["error"]["details"]["orderId"], order.id.to_string());
    }

    #[test]
    fn test_repository_error_mapping() {
        assert_eq!(
            AppError::from(RepositoryError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(RepositoryError::Conflict("order number".into())).code(),
            "ORDER_NUMBER_CONFLICT"
        );
        assert_eq!(
            AppError::from(RepositoryError::DataCorruption("bad row".into())).code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Unauthorized(SignatureError::Mismatch).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("10.0.0.1".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(ReconcileError::AmountMismatch {
                expected: rust_decimal::Decimal::ONE,
                received: rust_decimal::Decimal::TWO,
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Notification(NotificationError::NotConfigured).code(),
            "EMAIL_SEND_ERROR"
        );
    }
}
