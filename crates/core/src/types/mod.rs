//! Core types for Kelp Commerce.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod address;
pub mod email;
pub mod id;
pub mod money;
pub mod order_number;
pub mod status;

pub use address::Address;
pub use email::{Email, EmailError};
pub use id::*;
pub use money::{CurrencyCode, Money, MoneyError, round_money, to_minor_units};
pub use order_number::{OrderNumber, OrderNumberError};
pub use status::*;
