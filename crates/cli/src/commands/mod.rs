//! CLI command implementations.

pub mod migrate;
pub mod order;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use thiserror::Error;

use kelp_storefront::config::ConfigError;
use kelp_storefront::db::RepositoryError;
use kelp_storefront::services::NotificationError;
use kelp_storefront::state::StateError;

/// Errors surfaced by any command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Setup(#[from] StateError),

    #[error("Could not send confirmation: {0}")]
    Notification(#[from] NotificationError),

    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Nothing to change: pass --status and/or --payment-status")]
    NothingToChange,
}

/// `STOREFRONT_DATABASE_URL`, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, CliError> {
    dotenvy::dotenv().ok();

    std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("STOREFRONT_DATABASE_URL"))
}

/// Connect to the storefront database.
async fn connect() -> Result<PgPool, CliError> {
    let url = database_url()?;
    tracing::info!("Connecting to storefront database...");
    Ok(PgPool::connect(url.expose_secret()).await?)
}
