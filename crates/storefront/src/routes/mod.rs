//! HTTP route handlers for the storefront API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                   - Liveness
//! GET  /health/ready                             - Database ping
//!
//! # Cart (session-backed)
//! GET    /api/cart                               - Priced cart
//! DELETE /api/cart                               - Empty the cart
//! POST   /api/cart/items                         - Add an item
//! PATCH  /api/cart/items                         - Set a line's quantity
//! DELETE /api/cart/items                         - Remove a line
//! POST   /api/cart/coupon                        - Apply a coupon
//! DELETE /api/cart/coupon                        - Remove the coupon
//! GET    /api/cart/count                         - Item count badge
//!
//! # Orders
//! POST /api/orders                               - Checkout (alias: /api/orders/create)
//! GET  /api/orders/{order_number}                - Order with display totals
//! POST /api/orders/{order_number}/payment        - Retry payment
//! POST /api/orders/{order_number}/send-confirmation - Resend the confirmation email
//!
//! # Payment webhooks
//! POST /api/payments/payfast/webhook             - PayFast ITN
//! POST /api/payments/stripe/webhook              - Stripe events
//! ```

pub mod cart;
pub mod health;
pub mod orders;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Session-backed cart routes.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cart", get(cart::show).delete(cart::clear))
        .route(
            "/api/cart/items",
            post(cart::add_item)
                .patch(cart::update_item)
                .delete(cart::remove_item),
        )
        .route(
            "/api/cart/coupon",
            post(cart::apply_coupon).delete(cart::remove_coupon),
        )
        .route("/api/cart/count", get(cart::count))
}

/// Checkout and order routes.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(orders::create))
        .route("/api/orders/create", post(orders::create))
        .route("/api/orders/{order_number}", get(orders::show))
        .route(
            "/api/orders/{order_number}/payment",
            post(orders::retry_payment),
        )
        .route(
            "/api/orders/{order_number}/send-confirmation",
            post(orders::send_confirmation),
        )
}

/// Provider webhook routes. These carry no session.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/payments/payfast/webhook",
            post(webhooks::payfast_webhook),
        )
        .route(
            "/api/payments/stripe/webhook",
            post(webhooks::stripe_webhook),
        )
}

/// Liveness and readiness probes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
}
