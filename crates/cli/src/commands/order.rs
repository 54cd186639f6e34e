//! Order management commands.
//!
//! # Usage
//!
//! ```bash
//! # Print an order
//! kelp-cli order show KBB-M5X2K1Q0-7F3A9C
//!
//! # Mark a chat order as paid after the customer settled by EFT
//! kelp-cli order set-status KBB-M5X2K1Q0-7F3A9C --payment-status PAID --status PROCESSING
//!
//! # Send the confirmation email (with invoice) again
//! kelp-cli order resend-confirmation KBB-M5X2K1Q0-7F3A9C
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//! - `SMTP_*`, `EMAIL_FROM`, `SHOP_*` - only for `resend-confirmation`

use std::fmt::Write as _;

use kelp_core::{OrderNumber, OrderStatus, PaymentStatus};
use kelp_storefront::config::StorefrontConfig;
use kelp_storefront::db::{OrderStore, PgOrderStore};
use kelp_storefront::models::Order;
use kelp_storefront::services::{NotificationDispatcher, Notifier};
use kelp_storefront::state::StateError;

use super::{CliError, connect};

fn parse_number(number: &str) -> Result<OrderNumber, CliError> {
    OrderNumber::parse(number).map_err(|e| CliError::InvalidOrderNumber(format!("{number}: {e}")))
}

async fn find(store: &PgOrderStore<'_>, number: &OrderNumber) -> Result<Order, CliError> {
    store
        .find_by_number(number)
        .await?
        .ok_or_else(|| CliError::OrderNotFound(number.to_string()))
}

/// Plain-text order summary for the terminal.
fn summary(order: &Order) -> String {
    let formatted = order.formatted();
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Order {} ({})", order.order_number, order.id);
    let _ = writeln!(
        out,
        "Status: {} / payment {} via {}",
        order.status,
        order.payment_status,
        order.payment_method.label()
    );
    if let Some(payment_id) = &order.payment_id {
        let _ = writeln!(out, "Provider reference: {payment_id}");
    }
    let _ = writeln!(out, "Customer: {} <{}> {}", order.customer_name(), order.email, order.phone);
    let _ = writeln!(out, "Ship to: {}", order.shipping_address.lines().join(", "));
    let _ = writeln!(out);
    for item in &order.items {
        let _ = writeln!(
            out,
            "  {} x {} @ {}",
            item.quantity,
            item.display_name(),
            order.money(item.price)
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Subtotal: {}", formatted.subtotal);
    if !order.discount.is_zero() {
        let coupon = order.coupon_code.as_deref().unwrap_or("-");
        let _ = writeln!(out, "Discount ({coupon}): -{}", formatted.discount);
    }
    let _ = writeln!(out, "Shipping: {}", formatted.shipping);
    let _ = writeln!(out, "VAT: {}", formatted.tax);
    let _ = writeln!(out, "Total: {}", formatted.total);
    if let Some(notes) = &order.customer_notes {
        let _ = writeln!(out, "Notes: {notes}");
    }
    let _ = write!(out, "Created: {}", order.created_at.to_rfc3339());
    out
}

/// Print an order.
///
/// # Errors
///
/// Returns `CliError` if the number is malformed or the order does not exist.
pub async fn show(number: &str) -> Result<(), CliError> {
    let number = parse_number(number)?;
    let pool = connect().await?;
    let order = find(&PgOrderStore::new(&pool), &number).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", summary(&order));
    }
    Ok(())
}

/// Override an order's status and/or payment status.
///
/// # Errors
///
/// Returns `CliError` if neither status is given, the number is malformed or
/// the order does not exist.
pub async fn set_status(
    number: &str,
    status: Option<OrderStatus>,
    payment_status: Option<PaymentStatus>,
) -> Result<(), CliError> {
    if status.is_none() && payment_status.is_none() {
        return Err(CliError::NothingToChange);
    }
    let number = parse_number(number)?;
    let pool = connect().await?;
    let store = PgOrderStore::new(&pool);
    let order = find(&store, &number).await?;

    let updated = store.set_status(order.id, status, payment_status).await?;
    tracing::info!(
        order_number = %updated.order_number,
        from_status = %order.status,
        to_status = %updated.status,
        from_payment = %order.payment_status,
        to_payment = %updated.payment_status,
        "Order status updated"
    );
    Ok(())
}

/// Send the order confirmation email again.
///
/// # Errors
///
/// Returns `CliError` if configuration is incomplete, SMTP is not set up or
/// the send fails.
pub async fn resend_confirmation(number: &str) -> Result<(), CliError> {
    let number = parse_number(number)?;
    let config = StorefrontConfig::from_env()?;
    let notifier = NotificationDispatcher::from_config(config.email.as_ref(), &config.shop)
        .map_err(StateError::from)?;

    let pool = connect().await?;
    let order = find(&PgOrderStore::new(&pool), &number).await?;

    notifier.notify_order_paid(&order).await?;
    tracing::info!(order_number = %order.order_number, email = %order.email, "Confirmation sent");
    Ok(())
}
