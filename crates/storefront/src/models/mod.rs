//! Domain models for the storefront.
//!
//! These types represent validated domain objects, separate from the
//! database row types in [`crate::db`].

pub mod api;
pub mod catalog;
pub mod order;
pub mod session;

pub use api::{ApiErrorBody, ApiResponse, FieldError};
pub use catalog::CatalogProduct;
pub use order::{FormattedTotals, Order, OrderItem, PaymentTransition, PaymentUpdate};
