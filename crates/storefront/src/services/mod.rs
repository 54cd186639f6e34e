//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `cart` - Session-backed cart persistence and the priced cart view
//! - `checkout` - Validation, catalog re-pricing and order creation
//! - `reconciler` - Applying verified payment notifications to orders
//! - `notifications` - Order confirmation emails with the invoice attached

pub mod cart;
pub mod checkout;
pub mod notifications;
pub mod reconciler;

pub use cart::{CartError, CartStore, CartView};
pub use checkout::{CheckoutError, CheckoutRequest, place_order};
pub use notifications::{EmailNotifier, NotificationDispatcher, NotificationError, Notifier};
#[cfg(any(test, feature = "test-util"))]
pub use notifications::RecordingNotifier;
pub use reconciler::{ReconcileError, ReconcileOutcome, WebhookReconciler};
