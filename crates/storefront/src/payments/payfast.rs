//! PayFast instant EFT.
//!
//! Payment starts with a signed redirect to PayFast's process page; the
//! result arrives later as an ITN (Instant Transaction Notification), a
//! form-encoded POST signed with the same scheme.
//!
//! Signature: drop `signature`, sort by key, join `key=value` pairs with `&`
//! where values are trimmed and form-urlencoded (space as `+`), append
//! `&passphrase=...` when one is configured, then MD5 as lowercase hex.

use std::collections::BTreeMap;
use std::net::IpAddr;

use md5::{Digest, Md5};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;

use kelp_core::{OrderId, PaymentMethod, PaymentOutcome, round_money};

use super::{
    GatewayError, PayloadError, PaymentGateway, PaymentInitiation, PaymentNotification,
    SignatureError, constant_time_compare,
};
use crate::config::PayFastConfig;
use crate::models::Order;

/// Hosts PayFast sends ITNs from.
pub const VALID_HOSTS: [&str; 4] = [
    "www.payfast.co.za",
    "sandbox.payfast.co.za",
    "w1w.payfast.co.za",
    "w2w.payfast.co.za",
];

/// Path PayFast posts ITNs to.
pub const NOTIFY_PATH: &str = "/api/payments/payfast/webhook";

pub struct PayFastGateway {
    config: PayFastConfig,
    base_url: String,
    shop_name: String,
}

impl PayFastGateway {
    #[must_use]
    pub fn new(config: PayFastConfig, base_url: &str, shop_name: &str) -> Self {
        Self {
            config,
            base_url: base_url.trim_end_matches('/').to_owned(),
            shop_name: shop_name.to_owned(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &PayFastConfig {
        &self.config
    }

    fn passphrase(&self) -> Option<&str> {
        self.config
            .passphrase
            .as_ref()
            .map(ExposeSecret::expose_secret)
    }

    /// Redirect parameters for an order, without the signature.
    #[must_use]
    pub fn payment_params(&self, order: &Order) -> Vec<(&'static str, String)> {
        let address = &order.shipping_address;
        let number = &order.order_number;
        vec![
            ("merchant_id", self.config.merchant_id.clone()),
            (
                "merchant_key",
                self.config.merchant_key.expose_secret().to_owned(),
            ),
            (
                "return_url",
                format!("{}/checkout/success?order={number}", self.base_url),
            ),
            (
                "cancel_url",
                format!("{}/checkout/cancelled?order={number}", self.base_url),
            ),
            ("notify_url", format!("{}{NOTIFY_PATH}", self.base_url)),
            ("name_first", address.first_name.clone()),
            ("name_last", address.last_name.clone()),
            ("email_address", order.email.to_string()),
            ("m_payment_id", order.id.to_string()),
            ("amount", format!("{:.2}", round_money(order.total))),
            ("item_name", format!("Order {number}")),
            (
                "item_description",
                format!("{} item(s) from {}", order.items.len(), self.shop_name),
            ),
        ]
    }

    /// Full redirect URL: process page, parameters and signature.
    #[must_use]
    pub fn payment_url(&self, order: &Order) -> String {
        let params = self.payment_params(order);
        let signature = signature(
            params.iter().map(|(k, v)| (*k, v.as_str())),
            self.passphrase(),
        );

        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &params {
            query.append_pair(key, value);
        }
        query.append_pair("signature", &signature);

        format!("{}?{}", self.config.mode.process_url(), query.finish())
    }

    /// Authenticate and interpret an ITN body.
    ///
    /// Returns `Ok(None)` for statuses that are not terminal (e.g. `PENDING`).
    ///
    /// # Errors
    ///
    /// Returns [`ItnError::Signature`] if the ITN is not authentic and
    /// [`ItnError::Payload`] if it cannot be interpreted.
    pub fn parse_itn(&self, body: &str) -> Result<Option<PaymentNotification>, ItnError> {
        let params: BTreeMap<String, String> = url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .collect();

        verify_signature(&params, self.passphrase())?;
        Ok(notification_from_itn(&params)?)
    }
}

impl PaymentGateway for PayFastGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::PayFast
    }

    async fn initiate(&self, order: &Order) -> Result<PaymentInitiation, GatewayError> {
        Ok(PaymentInitiation {
            payment_url: Some(self.payment_url(order)),
            chat_url: None,
        })
    }
}

/// ITN rejection reasons.
#[derive(Debug, thiserror::Error)]
pub enum ItnError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes()).collect()
}

/// Compute the PayFast signature over `params`.
pub fn signature<'a>(
    params: impl IntoIterator<Item = (&'a str, &'a str)>,
    passphrase: Option<&str>,
) -> String {
    let mut pairs: Vec<(&str, &str)> = params
        .into_iter()
        .filter(|(key, _)| *key != "signature")
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut payload = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    if let Some(passphrase) = passphrase.filter(|p| !p.trim().is_empty()) {
        payload.push_str("&passphrase=");
        payload.push_str(&encode(passphrase));
    }

    hex::encode(Md5::digest(payload.as_bytes()))
}

/// Check the `signature` field of a parameter set.
///
/// # Errors
///
/// Returns `SignatureError::Missing` if there is no signature field and
/// `SignatureError::Mismatch` if it does not match.
pub fn verify_signature(
    params: &BTreeMap<String, String>,
    passphrase: Option<&str>,
) -> Result<(), SignatureError> {
    let received = params
        .get("signature")
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;

    let expected = signature(
        params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        passphrase,
    );

    if constant_time_compare(&received, &expected) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Map an authenticated ITN to a notification.
///
/// # Errors
///
/// Returns `PayloadError` if the order reference or payment id is
/// missing or malformed.
pub fn notification_from_itn(
    params: &BTreeMap<String, String>,
) -> Result<Option<PaymentNotification>, PayloadError> {
    let field = |name: &str| {
        params
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    let outcome = match field("payment_status") {
        Some("COMPLETE") => PaymentOutcome::Paid,
        Some("FAILED" | "CANCELLED") => PaymentOutcome::Failed,
        Some(other) => {
            tracing::info!(payment_status = %other, "non-terminal PayFast status");
            return Ok(None);
        }
        None => {
            return Err(PayloadError::Malformed(
                "missing payment_status".to_owned(),
            ));
        }
    };

    let reference = field("m_payment_id").ok_or(PayloadError::MissingOrderReference)?;
    let order_id = reference
        .parse::<OrderId>()
        .map_err(|_| PayloadError::InvalidOrderReference(reference.to_owned()))?;
    let external_id = field("pf_payment_id")
        .ok_or_else(|| PayloadError::Malformed("missing pf_payment_id".to_owned()))?
        .to_owned();
    let amount = field("amount_gross")
        .map(|raw| {
            raw.parse::<Decimal>()
                .map_err(|_| PayloadError::Malformed(format!("invalid amount_gross: {raw}")))
        })
        .transpose()?;

    let payload = serde_json::to_value(params)
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;

    Ok(Some(PaymentNotification {
        provider: PaymentMethod::PayFast,
        order_id,
        outcome,
        external_id,
        amount,
        payload,
    }))
}

/// Resolve the addresses PayFast may send ITNs from.
pub async fn resolve_valid_sources() -> Vec<IpAddr> {
    let mut addresses = Vec::new();
    for host in VALID_HOSTS {
        match tokio::net::lookup_host((host, 443)).await {
            Ok(resolved) => addresses.extend(resolved.map(|addr| addr.ip())),
            Err(e) => tracing::warn!(host, error = %e, "could not resolve PayFast host"),
        }
    }
    addresses
}

/// Whether `ip` is one of PayFast's notification addresses.
pub async fn is_valid_source(ip: IpAddr) -> bool {
    resolve_valid_sources().await.contains(&ip)
}
