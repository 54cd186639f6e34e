//! Payment gateway adapters.
//!
//! Each payment method has one adapter that turns a persisted [`Order`] into
//! something the customer can act on: a hosted checkout URL (Stripe), a
//! signed redirect (PayFast) or a pre-filled chat message (WhatsApp).
//!
//! Adapters for Stripe and PayFast also own the provider-specific half of
//! webhook handling: signature verification and mapping provider payloads to
//! a [`PaymentNotification`].

pub mod payfast;
pub mod stripe;
pub mod whatsapp;

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use kelp_core::{MoneyError, OrderId, PaymentMethod, PaymentOutcome};

use crate::config::StorefrontConfig;
use crate::models::{Order, PaymentUpdate};

pub use payfast::PayFastGateway;
pub use stripe::StripeGateway;
pub use whatsapp::WhatsAppGateway;

/// Upper bound for any single call to a payment provider.
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while starting a payment.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The order's payment method has no configured adapter.
    #[error("{} payments are not configured", .0.label())]
    NotConfigured(PaymentMethod),

    /// Transport-level failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the request.
    #[error("provider returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The provider answered with something we could not use.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("amount error: {0}")]
    Money(#[from] MoneyError),
}

/// Webhook authentication failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature missing")]
    Missing,
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// A webhook payload that authenticated but could not be interpreted.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("payload does not reference an order")]
    MissingOrderReference,
    #[error("invalid order reference: {0}")]
    InvalidOrderReference(String),
}

/// What the customer should do next to pay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub payment_url: Option<String>,
    pub chat_url: Option<String>,
}

/// A verified provider notification with a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub provider: PaymentMethod,
    pub order_id: OrderId,
    pub outcome: PaymentOutcome,
    pub external_id: String,
    /// Amount the provider says was charged, in major units.
    pub amount: Option<Decimal>,
    pub payload: serde_json::Value,
}

impl PaymentNotification {
    #[must_use]
    pub fn to_update(&self) -> PaymentUpdate {
        PaymentUpdate {
            order_id: self.order_id,
            provider: self.provider,
            external_id: self.external_id.clone(),
            outcome: self.outcome,
            payload: self.payload.clone(),
        }
    }
}

/// One payment method's initiation strategy.
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    fn initiate(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<PaymentInitiation, GatewayError>> + Send;
}

/// Every adapter the storefront knows about. Stripe and PayFast are optional;
/// chat orders are always available.
pub struct Gateways {
    stripe: Option<StripeGateway>,
    payfast: Option<PayFastGateway>,
    whatsapp: WhatsAppGateway,
}

impl Gateways {
    #[must_use]
    pub const fn new(
        stripe: Option<StripeGateway>,
        payfast: Option<PayFastGateway>,
        whatsapp: WhatsAppGateway,
    ) -> Self {
        Self {
            stripe,
            payfast,
            whatsapp,
        }
    }

    /// Build adapters for whatever the configuration enables.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the HTTP client cannot be built.
    pub fn from_config(config: &StorefrontConfig) -> Result<Self, GatewayError> {
        let stripe = config
            .stripe
            .as_ref()
            .map(|stripe| StripeGateway::new(stripe, &config.base_url))
            .transpose()?;
        let payfast = config
            .payfast
            .as_ref()
            .map(|payfast| PayFastGateway::new(payfast.clone(), &config.base_url, &config.shop.name));
        let whatsapp = WhatsAppGateway::new(
            config.shop.whatsapp_number.as_deref(),
            &config.shop.name,
        );

        Ok(Self::new(stripe, payfast, whatsapp))
    }

    #[must_use]
    pub const fn stripe(&self) -> Option<&StripeGateway> {
        self.stripe.as_ref()
    }

    #[must_use]
    pub const fn payfast(&self) -> Option<&PayFastGateway> {
        self.payfast.as_ref()
    }

    #[must_use]
    pub const fn whatsapp(&self) -> &WhatsAppGateway {
        &self.whatsapp
    }

    /// Start payment with the adapter matching `order.payment_method`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotConfigured` if that adapter is disabled, or
    /// whatever the adapter itself fails with.
    #[tracing::instrument(skip(self, order), fields(order_number = %order.order_number, method = %order.payment_method))]
    pub async fn initiate(&self, order: &Order) -> Result<PaymentInitiation, GatewayError> {
        match order.payment_method {
            PaymentMethod::Stripe => {
                self.stripe
                    .as_ref()
                    .ok_or(GatewayError::NotConfigured(PaymentMethod::Stripe))?
                    .initiate(order)
                    .await
            }
            PaymentMethod::PayFast => {
                self.payfast
                    .as_ref()
                    .ok_or(GatewayError::NotConfigured(PaymentMethod::PayFast))?
                    .initiate(order)
                    .await
            }
            PaymentMethod::WhatsApp => self.whatsapp.initiate(order).await,
        }
    }
}

/// Build the shared outbound HTTP client.
pub(crate) fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(GATEWAY_TIMEOUT)
        .connect_timeout(GATEWAY_TIMEOUT)
        .build()
}

/// Send a request, retrying once on connect/timeout errors or a 5xx.
pub(crate) async fn send_with_retry<F>(build: F) -> Result<reqwest::Response, GatewayError>
where
    F: Fn() -> reqwest::RequestBuilder + Send + Sync,
{
    match build().send().await {
        Ok(response) if response.status().is_server_error() => {
            tracing::warn!(status = %response.status(), "payment provider error, retrying once");
        }
        Ok(response) => return Ok(response),
        Err(e) if e.is_connect() || e.is_timeout() => {
            tracing::warn!(error = %e, "payment provider unreachable, retrying once");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(build().send().await?)
}

/// Constant-time string comparison to prevent timing attacks.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
