//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use kelp_core::PricingRules;

use crate::config::StorefrontConfig;
use crate::db::{PgCatalog, PgOrderStore};
use crate::payments::{GatewayError, Gateways};
use crate::services::NotificationDispatcher;

/// Error building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("payment gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("email setup failed: {0}")]
    Email(#[from] lettre::transport::smtp::Error),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    gateways: Gateways,
    notifier: NotificationDispatcher,
    pricing: PricingRules,
}

impl AppState {
    /// Create a new application state from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a payment adapter or the SMTP relay cannot be set up.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let gateways = Gateways::from_config(&config)?;
        let notifier = NotificationDispatcher::from_config(config.email.as_ref(), &config.shop)?;
        Ok(Self::from_parts(
            config,
            pool,
            gateways,
            notifier,
            PricingRules::default(),
        ))
    }

    /// Assemble state from pre-built parts.
    #[must_use]
    pub fn from_parts(
        config: StorefrontConfig,
        pool: PgPool,
        gateways: Gateways,
        notifier: NotificationDispatcher,
        pricing: PricingRules,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                gateways,
                notifier,
                pricing,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn gateways(&self) -> &Gateways {
        &self.inner.gateways
    }

    #[must_use]
    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.inner.notifier
    }

    #[must_use]
    pub fn pricing(&self) -> &PricingRules {
        &self.inner.pricing
    }

    /// Order repository over the shared pool.
    #[must_use]
    pub fn orders(&self) -> PgOrderStore<'_> {
        PgOrderStore::new(&self.inner.pool)
    }

    /// Catalog lookup over the shared pool.
    #[must_use]
    pub fn catalog(&self) -> PgCatalog<'_> {
        PgCatalog::new(&self.inner.pool)
    }
}
