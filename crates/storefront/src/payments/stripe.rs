//! Stripe Checkout (hosted card payments).
//!
//! Initiation creates a Checkout Session through the REST API and hands the
//! customer the session URL. Outcomes arrive as signed webhook events.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use kelp_core::{OrderId, PaymentMethod, PaymentOutcome, to_minor_units};

use super::{
    GatewayError, PayloadError, PaymentGateway, PaymentInitiation, PaymentNotification,
    SignatureError, constant_time_compare, http_client, send_with_retry,
};
use crate::config::StripeConfig;
use crate::models::Order;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Hosted checkout adapter.
#[derive(Clone)]
pub struct StripeGateway {
    inner: Arc<StripeGatewayInner>,
}

struct StripeGatewayInner {
    client: reqwest::Client,
    secret_key: SecretString,
    webhook_secret: SecretString,
    api_base: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    /// Create a new Stripe adapter.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &StripeConfig, base_url: &str) -> Result<Self, GatewayError> {
        Ok(Self {
            inner: Arc::new(StripeGatewayInner {
                client: http_client()?,
                secret_key: config.secret_key.clone(),
                webhook_secret: config.webhook_secret.clone(),
                api_base: config.api_base.trim_end_matches('/').to_owned(),
                base_url: base_url.trim_end_matches('/').to_owned(),
            }),
        })
    }

    /// Form fields for `POST /v1/checkout/sessions`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Money` if an amount does not fit in cents.
    pub fn checkout_form(&self, order: &Order) -> Result<Vec<(String, String)>, GatewayError> {
        checkout_form(order, &self.inner.base_url)
    }

    /// Authenticate a webhook delivery and map it to a notification.
    ///
    /// Returns `Ok(None)` for events that carry no terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Signature`] if the delivery is not authentic
    /// and [`WebhookError::Payload`] if the event cannot be interpreted.
    pub fn parse_webhook(
        &self,
        signature_header: Option<&str>,
        body: &str,
    ) -> Result<Option<PaymentNotification>, WebhookError> {
        let header = signature_header.ok_or(SignatureError::Missing)?;
        verify_signature(
            header,
            body,
            self.inner.webhook_secret.expose_secret(),
            chrono::Utc::now().timestamp(),
        )?;
        Ok(parse_event(body)?)
    }
}

impl PaymentGateway for StripeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    async fn initiate(&self, order: &Order) -> Result<PaymentInitiation, GatewayError> {
        let form = self.checkout_form(order)?;
        let url = format!("{}/v1/checkout/sessions", self.inner.api_base);

        let response = send_with_retry(|| {
            self.inner
                .client
                .post(&url)
                .basic_auth(self.inner.secret_key.expose_secret(), None::<&str>)
                .form(&form)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| "unknown error".to_owned());
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let session_url = session.url.ok_or_else(|| {
            GatewayError::InvalidResponse(format!("checkout session {} has no url", session.id))
        })?;

        tracing::info!(
            order_number = %order.order_number,
            session_id = %session.id,
            "Stripe checkout session created"
        );

        Ok(PaymentInitiation {
            payment_url: Some(session_url),
            chat_url: None,
        })
    }
}

fn push_line(
    form: &mut Vec<(String, String)>,
    index: usize,
    currency: &str,
    name: &str,
    unit_amount: i64,
    quantity: u32,
) {
    let prefix = format!("line_items[{index}]");
    form.push((format!("{prefix}[price_data][currency]"), currency.to_owned()));
    form.push((
        format!("{prefix}[price_data][product_data][name]"),
        name.to_owned(),
    ));
    form.push((
        format!("{prefix}[price_data][unit_amount]"),
        unit_amount.to_string(),
    ));
    form.push((format!("{prefix}[quantity]"), quantity.to_string()));
}

/// Build Checkout Session form fields. Line amounts always add up to
/// `order.total`: items, shipping and VAT are itemized, except when a
/// discount applies, in which case a single line for the total is sent.
///
/// # Errors
///
/// Returns `GatewayError::Money` if an amount does not fit in cents.
pub fn checkout_form(order: &Order, base_url: &str) -> Result<Vec<(String, String)>, GatewayError> {
    let number = &order.order_number;
    let order_id = order.id.to_string();
    let currency = order.currency.provider_code();

    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("customer_email".into(), order.email.to_string()),
        ("client_reference_id".into(), order_id.clone()),
        ("metadata[orderId]".into(), order_id.clone()),
        ("metadata[orderNumber]".into(), number.to_string()),
        ("payment_intent_data[metadata][orderId]".into(), order_id),
        (
            "payment_intent_data[metadata][orderNumber]".into(),
            number.to_string(),
        ),
        (
            "success_url".into(),
            format!("{base_url}/checkout/success?order={number}&session_id={{CHECKOUT_SESSION_ID}}"),
        ),
        (
            "cancel_url".into(),
            format!("{base_url}/checkout/cancelled?order={number}"),
        ),
    ];

    if !order.discount.is_zero() {
        let name = format!("Order {number} ({} items)", order.item_count());
        push_line(&mut form, 0, &currency, &name, to_minor_units(order.total)?, 1);
        return Ok(form);
    }

    let mut index = 0;
    for item in &order.items {
        push_line(
            &mut form,
            index,
            &currency,
            &item.display_name(),
            to_minor_units(item.price)?,
            item.quantity,
        );
        index += 1;
    }
    if !order.shipping_cost.is_zero() {
        push_line(
            &mut form,
            index,
            &currency,
            "Shipping",
            to_minor_units(order.shipping_cost)?,
            1,
        );
        index += 1;
    }
    if !order.tax.is_zero() {
        push_line(&mut form, index, &currency, "VAT", to_minor_units(order.tax)?, 1);
    }

    Ok(form)
}

/// Webhook rejection reasons.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Compute the `v1` signature for a payload.
///
/// # Errors
///
/// Returns `SignatureError::Malformed` if the secret cannot key the MAC.
pub fn sign(secret: &str, timestamp: &str, body: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]` header.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing why the header was rejected.
pub fn verify_signature(
    header: &str,
    body: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::Malformed("missing timestamp".to_owned()))?;
    let issued_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::Malformed("invalid timestamp".to_owned()))?;
    if (now - issued_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing v1 signature".to_owned()));
    }

    let expected = sign(secret, timestamp, body)?;
    if signatures
        .iter()
        .any(|candidate| constant_time_compare(candidate, &expected))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// The fields we read from sessions and payment intents.
#[derive(Debug, Deserialize)]
struct EventObject {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    amount_received: Option<i64>,
}

impl EventObject {
    fn order_reference(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("orderId"))
            .or(self.client_reference_id.as_ref())
            .map(String::as_str)
            .filter(|reference| !reference.trim().is_empty())
    }
}

/// Map a (verified) event body to a notification.
///
/// # Errors
///
/// Returns `PayloadError` if the body is not an event or a relevant
/// event has no usable order reference.
pub fn parse_event(body: &str) -> Result<Option<PaymentNotification>, PayloadError> {
    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|e| PayloadError::Malformed(e.to_string()))?;
    let event: Event = serde_json::from_value(payload.clone())
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;
    let object: EventObject = serde_json::from_value(event.data.object)
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;

    let (outcome, amount) = match event.kind.as_str() {
        "checkout.session.completed" => {
            if object.payment_status.as_deref() != Some("paid") {
                tracing::info!(event_id = %event.id, "checkout completed, payment not yet settled");
                return Ok(None);
            }
            (PaymentOutcome::Paid, object.amount_total)
        }
        "checkout.session.async_payment_succeeded" => (PaymentOutcome::Paid, object.amount_total),
        "checkout.session.async_payment_failed" | "checkout.session.expired" => {
            (PaymentOutcome::Failed, None)
        }
        "payment_intent.succeeded" => (PaymentOutcome::Paid, object.amount_received),
        "payment_intent.payment_failed" => (PaymentOutcome::Failed, None),
        other => {
            tracing::debug!(event_id = %event.id, event_type = %other, "ignoring Stripe event");
            return Ok(None);
        }
    };

    let reference = object
        .order_reference()
        .ok_or(PayloadError::MissingOrderReference)?;
    let order_id = reference
        .parse::<OrderId>()
        .map_err(|_| PayloadError::InvalidOrderReference(reference.to_owned()))?;

    Ok(Some(PaymentNotification {
        provider: PaymentMethod::Stripe,
        order_id,
        outcome,
        external_id: object.id,
        amount: amount.map(|cents| Decimal::new(cents, 2)),
        payload,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::order::fixtures;
    use rust_decimal_macros::dec;

    const SECRET: &str = "whsec_9fK2mQ7xLp4TzR8vN3cW6bY1hJ5dG0sA";

    fn event(kind: &str, object: &serde_json::Value) -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": kind,
            "data": { "object": object }
        })
        .to_string()
    }

    fn form_value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn charged_cents(form: &[(String, String)]) -> i64 {
        (0..)
            .map_while(|i| {
                let amount = form_value(form, &format!("line_items[{i}][price_data][unit_amount]"))?;
                let quantity = form_value(form, &format!("line_items[{i}][quantity]"))?;
                Some(amount.parse::<i64>().unwrap() * quantity.parse::<i64>().unwrap())
            })
            .sum()
    }

    #[test]
    fn test_checkout_form_charges_order_total() {
        let order = fixtures::order(PaymentMethod::Stripe);
        let form = checkout_form(&order, "https://kelpboardbags.co.za").unwrap();

        assert_eq!(charged_cents(&form), 308_270);
        assert_eq!(
            form_value(&form, "line_items[0][price_data][unit_amount]"),
            Some("129900")
        );
        assert_eq!(
            form_value(&form, "line_items[0][price_data][currency]"),
            Some("zar")
        );
        assert_eq!(
            form_value(&form, "metadata[orderId]"),
            Some(order.id.to_string().as_str())
        );
        assert_eq!(
            form_value(&form, "cancel_url"),
            Some(format!("https://kelpboardbags.co.za/checkout/cancelled?order={}", order.order_number).as_str())
        );
        assert!(form_value(&form, "success_url").unwrap().ends_with("session_id={CHECKOUT_SESSION_ID}"));
    }

    #[test]
    fn test_checkout_form_with_discount_uses_single_line() {
        let mut order = fixtures::order(PaymentMethod::Stripe);
        order.discount = dec!(100.00);
        order.tax = dec!(374.70);
        order.total = order.subtotal - order.discount + order.shipping_cost + order.tax;

        let form = checkout_form(&order, "https://kelpboardbags.co.za").unwrap();
        assert_eq!(charged_cents(&form), 296_770);
        assert!(form_value(&form, "line_items[1][quantity]").is_none());
    }

    #[test]
    fn test_signature_round_trip_and_tamper() {
        let body = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(SECRET, &now.to_string(), body).unwrap());

        assert!(verify_signature(&header, body, SECRET, now + 10).is_ok());
        assert_eq!(
            verify_signature(&header, r#"{"id":"evt_2"}"#, SECRET, now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(&header, body, "whsec_other", now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_signature_tolerance() {
        let body = "{}";
        let issued = 1_700_000_000;
        let header = format!("t={issued},v1={}", sign(SECRET, &issued.to_string(), body).unwrap());
        assert_eq!(
            verify_signature(&header, body, SECRET, issued + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_signature_header_shapes() {
        assert!(matches!(
            verify_signature("v1=abc", "{}", SECRET, 0),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify_signature("t=0", "{}", SECRET, 0),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            verify_signature("t=soon,v1=abc", "{}", SECRET, 0),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn test_completed_session_maps_to_paid() {
        let order_id = OrderId::new();
        let body = event(
            "checkout.session.completed",
            &serde_json::json!({
                "id": "cs_test_1",
                "payment_status": "paid",
                "amount_total": 308_270,
                "metadata": { "orderId": order_id.to_string() }
            }),
        );

        let notification = parse_event(&body).unwrap().unwrap();
        assert_eq!(notification.order_id, order_id);
        assert_eq!(notification.outcome, PaymentOutcome::Paid);
        assert_eq!(notification.external_id, "cs_test_1");
        assert_eq!(notification.amount, Some(dec!(3082.70)));
    }

    #[test]
    fn test_unpaid_completion_is_not_terminal() {
        let body = event(
            "checkout.session.completed",
            &serde_json::json!({
                "id": "cs_test_1",
                "payment_status": "unpaid",
                "metadata": { "orderId": OrderId::new().to_string() }
            }),
        );
        assert!(parse_event(&body).unwrap().is_none());
    }

    #[test]
    fn test_failure_events_and_reference_fallback() {
        let order_id = OrderId::new();
        for kind in [
            "checkout.session.expired",
            "checkout.session.async_payment_failed",
        ] {
            let body = event(
                kind,
                &serde_json::json!({
                    "id": "cs_test_2",
                    "metadata": {},
                    "client_reference_id": order_id.to_string()
                }),
            );
            let notification = parse_event(&body).unwrap().unwrap();
            assert_eq!(notification.outcome, PaymentOutcome::Failed);
            assert_eq!(notification.order_id, order_id);
            assert!(notification.amount.is_none());
        }
    }

    #[test]
    fn test_unhandled_events_are_ignored() {
        let body = event("customer.created", &serde_json::json!({ "id": "cus_1" }));
        assert!(parse_event(&body).unwrap().is_none());
    }

    #[test]
    fn test_missing_reference() {
        let body = event(
            "payment_intent.succeeded",
            &serde_json::json!({ "id": "pi_1", "amount_received": 100 }),
        );
        assert!(matches!(
            parse_event(&body),
            Err(PayloadError::MissingOrderReference)
        ));
    }

    #[test]
    fn test_parse_webhook_requires_header() {
        let gateway = StripeGateway::new(
            &StripeConfig {
                secret_key: SecretString::from("sk_test_abc"),
                webhook_secret: SecretString::from(SECRET),
                api_base: "https://api.stripe.com".into(),
            },
            "https://kelpboardbags.co.za",
        )
        .unwrap();
        assert!(matches!(
            gateway.parse_webhook(None, "{}"),
            Err(WebhookError::Signature(SignatureError::Missing))
        ));
    }
}
