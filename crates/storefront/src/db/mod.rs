//! Database operations for the storefront `PostgreSQL`.
//!
//! ## Tables
//!
//! - `products` - Catalog rows, read at checkout to re-price orders
//! - `orders` / `order_items` - Frozen order snapshots
//! - `payment_events` - One row per distinct provider notification
//! - `tower_sessions.session` - Session storage (carts)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p kelp-cli -- migrate
//! ```
//!
//! Repositories are reached through the [`OrderStore`] and [`Catalog`] traits
//! so the checkout and webhook services can run against [`memory`] stores in
//! tests.

pub mod catalog;
pub mod memory;
pub mod orders;

use std::future::Future;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use kelp_core::{OrderId, OrderNumber, OrderStatus, PaymentStatus, ProductId};

use crate::models::{CatalogProduct, Order, PaymentTransition, PaymentUpdate};

pub use catalog::PgCatalog;
pub use memory::{MemoryCatalog, MemoryOrderStore};
pub use orders::PgOrderStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate order number).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map a sqlx error, turning unique violations into [`Self::Conflict`].
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(err)
    }
}

/// Persistence for orders and their payment state.
pub trait OrderStore: Send + Sync {
    /// Persist a new order and its items atomically.
    ///
    /// Returns [`RepositoryError::Conflict`] if the order number is taken.
    fn insert(&self, order: &Order) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn find_by_id(
        &self,
        id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    fn find_by_number(
        &self,
        number: &OrderNumber,
    ) -> impl Future<Output = Result<Option<Order>, RepositoryError>> + Send;

    /// Record a provider notification and, if the order accepts it, move the
    /// order to the outcome's status. Both happen in one transaction.
    ///
    /// Returns [`RepositoryError::NotFound`] if the order does not exist.
    fn apply_payment(
        &self,
        update: &PaymentUpdate,
    ) -> impl Future<Output = Result<PaymentTransition, RepositoryError>> + Send;

    /// Operator override of either status. `None` leaves that field alone.
    fn set_status(
        &self,
        id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<PaymentStatus>,
    ) -> impl Future<Output = Result<Order, RepositoryError>> + Send;
}

/// Read-only product lookup used to re-price checkouts.
pub trait Catalog: Send + Sync {
    /// Fetch the given products. Unknown ids are simply absent from the result.
    fn products(
        &self,
        ids: &[ProductId],
    ) -> impl Future<Output = Result<Vec<CatalogProduct>, RepositoryError>> + Send;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
