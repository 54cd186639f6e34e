//! Order API handlers: checkout, lookup, payment retry and confirmation resend.

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::Serialize;
use tracing::instrument;

use kelp_core::{OrderId, OrderNumber};

use crate::db::OrderStore;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::RequestId;
use crate::models::{ApiResponse, FormattedTotals, Order};
use crate::services::{CheckoutRequest, Notifier, place_order};
use crate::state::AppState;

/// Response to a successful checkout or payment retry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub payment_url: Option<String>,
    pub chat_url: Option<String>,
}

/// An order with its display totals.
#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub formatted: FormattedTotals,
}

#[derive(Debug, Serialize)]
pub struct ConfirmationSent {
    pub sent: bool,
}

async fn load_order(state: &AppState, order_number: &str) -> Result<Order> {
    let not_found = || AppError::OrderNotFound(format!("Order {order_number} not found"));
    let number = OrderNumber::parse(order_number).map_err(|_| not_found())?;
    state
        .orders()
        .find_by_number(&number)
        .await?
        .ok_or_else(not_found)
}

async fn start_payment(state: &AppState, order: &Order) -> Result<CreatedOrder> {
    let initiation = state
        .gateways()
        .initiate(order)
        .await
        .map_err(|e| AppError::gateway_for(order, e))?;

    Ok(CreatedOrder {
        order_id: order.id,
        order_number: order.order_number.clone(),
        payment_url: initiation.payment_url,
        chat_url: initiation.chat_url,
    })
}

/// `POST /api/orders` and `POST /api/orders/create`
///
/// Validates and re-prices the submission, stores the order, then asks the
/// matching gateway how the customer should pay. If the gateway fails the
/// order still exists and the error carries its number for a retry.
#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    payload: std::result::Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<CreatedOrder>>> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e.body_text(), "unreadable checkout body");
        AppError::BadRequest("Malformed checkout request".to_owned())
    })?;

    let order = place_order(
        &state.orders(),
        &state.catalog(),
        state.pricing(),
        &state.config().shop,
        &request,
    )
    .await?;

    let order_number = order.order_number.to_string();
    let request_id = request_id.map(|Extension(RequestId(id))| id).unwrap_or_default();
    add_breadcrumb(
        "order",
        "Order created",
        &[
            ("order_number", order_number.as_str()),
            ("payment_method", order.payment_method.as_str()),
            ("request_id", request_id.as_str()),
        ],
    );
    tracing::info!(
        order_number = %order.order_number,
        total = %order.total,
        method = %order.payment_method,
        "order created"
    );

    let created = start_payment(&state, &order).await?;
    Ok(Json(ApiResponse::ok(created)))
}

/// `GET /api/orders/{order_number}`
#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderView>>> {
    let order = load_order(&state, &order_number).await?;
    let formatted = order.formatted();
    Ok(Json(ApiResponse::ok(OrderView { order, formatted })))
}

/// `POST /api/orders/{order_number}/payment`
///
/// Re-runs the payment adapter for an order that is still awaiting payment.
#[instrument(skip(state))]
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<CreatedOrder>>> {
    let order = load_order(&state, &order_number).await?;
    if !order.accepts_payment() {
        return Err(AppError::BadRequest(format!(
            "Order {} is already {}",
            order.order_number, order.payment_status
        )));
    }

    add_breadcrumb(
        "order",
        "Payment retried",
        &[("order_number", order_number.as_str())],
    );
    let created = start_payment(&state, &order).await?;
    Ok(Json(ApiResponse::ok(created)))
}

/// `POST /api/orders/{order_number}/send-confirmation`
#[instrument(skip(state))]
pub async fn send_confirmation(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<ConfirmationSent>>> {
    let order = load_order(&state, &order_number).await?;
    state.notifier().notify_order_paid(&order).await?;

    add_breadcrumb(
        "order",
        "Confirmation resent",
        &[("order_number", order_number.as_str())],
    );
    Ok(Json(ApiResponse::ok(ConfirmationSent { sent: true })))
}
