//! Kelp Core - domain types, cart rules and the pricing engine.
//!
//! This crate is shared by every Kelp Commerce component:
//! - `storefront` - Cart API, checkout, payment gateways and webhooks
//! - `cli` - Migrations and operator commands
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! database access, no HTTP clients. Cart totals are always derived here, so
//! the storefront and the order snapshot agree on the same arithmetic.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, email, money, addresses, order numbers, statuses
//! - [`pricing`] - Subtotal, discount, shipping, VAT and total computation
//! - [`cart`] - Line-item collection rules (add, remove, clamp, coupon)

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod pricing;
pub mod types;

pub use cart::{
    AddOutcome, CartState, LineItem, LineItemError, MAX_LINE_QUANTITY, MAX_UNIT_PRICE,
};
pub use pricing::{Cart, Priced, PricingRules, ShippingRate, Totals, compute_cart, compute_totals};
pub use types::*;
