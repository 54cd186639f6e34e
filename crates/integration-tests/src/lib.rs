//! Integration test support for Kelp Commerce.
//!
//! The tests in `tests/` drive checkout, payment initiation and webhook
//! reconciliation end to end against the in-memory stores, so no database or
//! provider account is needed:
//!
//! ```bash
//! cargo test -p kelp-integration-tests
//! ```
//!
//! Provider deliveries are built here the way Stripe and PayFast send them:
//! real signatures over real bodies.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use kelp_core::{PaymentMethod, PricingRules, ProductId, round_money};
use kelp_storefront::config::{PayFastConfig, PayFastMode, ShopConfig, StripeConfig};
use kelp_storefront::db::{MemoryCatalog, MemoryOrderStore};
use kelp_storefront::models::{CatalogProduct, Order};
use kelp_storefront::payments::{PayFastGateway, PaymentNotification, StripeGateway, payfast, stripe};
use kelp_storefront::services::{
    CheckoutError, CheckoutRequest, RecordingNotifier, ReconcileError, ReconcileOutcome,
    WebhookReconciler, place_order,
};

pub const BASE_URL: &str = "https://kelpboardbags.co.za";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_Q3vX8mN2pL7kR4tY9wB1cF6hJ0dZ5sGa";
pub const PAYFAST_PASSPHRASE: &str = "kelp-itn-passphrase";

/// Catalog row for a R1,299.00 board bag.
#[must_use]
pub fn longboard_bag() -> CatalogProduct {
    CatalogProduct {
        id: ProductId::new(),
        name: "Longboard Bag".into(),
        slug: "longboard-bag".into(),
        price: dec!(1299.00),
        inventory: 250,
        track_inventory: true,
        active: true,
        image: Some("/images/longboard-bag.jpg".into()),
    }
}

/// A complete, valid checkout submission for `quantity` of `product`,
/// shipped within South Africa.
#[must_use]
pub fn checkout_request(product: ProductId, quantity: u32, method: PaymentMethod) -> CheckoutRequest {
    serde_json::from_value(serde_json::json!({
        "email": "sipho.dlamini@example.co.za",
        "phone": "+27 83 555 0147",
        "shippingFirstName": "Sipho",
        "shippingLastName": "Dlamini",
        "shippingAddress1": "4 Marine Drive",
        "shippingCity": "Durban",
        "shippingProvince": "KwaZulu-Natal",
        "shippingPostalCode": "4001",
        "shippingCountry": "ZA",
        "shippingPhone": "+27 83 555 0147",
        "sameAsShipping": true,
        "paymentMethod": method.as_str(),
        "items": [{ "productId": product.to_string(), "quantity": quantity }],
        "cart": { "discount": "0", "total": "0" }
    }))
    .unwrap()
}

/// Stores, catalog and notifier for one test.
pub struct Shop {
    pub store: MemoryOrderStore,
    pub catalog: MemoryCatalog,
    pub notifier: RecordingNotifier,
    pub product: CatalogProduct,
    pub rules: PricingRules,
    pub config: ShopConfig,
}

impl Default for Shop {
    fn default() -> Self {
        Self::with_store(MemoryOrderStore::new())
    }
}

impl Shop {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: MemoryOrderStore) -> Self {
        let product = longboard_bag();
        Self {
            store,
            catalog: MemoryCatalog::new([product.clone()]),
            notifier: RecordingNotifier::default(),
            product,
            rules: PricingRules::default(),
            config: ShopConfig::default(),
        }
    }

    /// Check out `quantity` bags.
    ///
    /// # Errors
    ///
    /// Whatever [`place_order`] fails with.
    pub async fn checkout(
        &self,
        quantity: u32,
        method: PaymentMethod,
    ) -> Result<Order, CheckoutError> {
        let request = checkout_request(self.product.id, quantity, method);
        place_order(&self.store, &self.catalog, &self.rules, &self.config, &request).await
    }

    /// Apply a verified notification.
    ///
    /// # Errors
    ///
    /// Whatever [`WebhookReconciler::reconcile`] fails with.
    pub async fn reconcile(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        WebhookReconciler::new(&self.store, &self.notifier)
            .reconcile(notification)
            .await
    }
}

/// Stripe adapter keyed with [`STRIPE_WEBHOOK_SECRET`].
#[must_use]
pub fn stripe_gateway() -> StripeGateway {
    StripeGateway::new(
        &StripeConfig {
            secret_key: SecretString::from("sk_test_51Kelp0Integration0Tests"),
            webhook_secret: SecretString::from(STRIPE_WEBHOOK_SECRET),
            api_base: "https://api.stripe.com".into(),
        },
        BASE_URL,
    )
    .unwrap()
}

/// A Checkout Session event body for `order`.
#[must_use]
pub fn stripe_session_event(
    event_type: &str,
    order: &Order,
    session_id: &str,
    payment_status: &str,
) -> String {
    serde_json::json!({
        "id": format!("evt_{session_id}"),
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "client_reference_id": order.id.to_string(),
                "metadata": {
                    "orderId": order.id.to_string(),
                    "orderNumber": order.order_number.to_string(),
                },
                "payment_status": payment_status,
                "amount_total": cents(order.total),
                "currency": "zar",
            }
        }
    })
    .to_string()
}

/// `Stripe-Signature` header for `body`, signed now.
#[must_use]
pub fn stripe_signature_header(body: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = stripe::sign(STRIPE_WEBHOOK_SECRET, &timestamp, body).unwrap();
    format!("t={timestamp},v1={signature}")
}

fn cents(amount: Decimal) -> i64 {
    let mut rounded = round_money(amount);
    rounded.rescale(2);
    i64::try_from(rounded.mantissa()).unwrap()
}

/// PayFast adapter configured with [`PAYFAST_PASSPHRASE`].
#[must_use]
pub fn payfast_gateway() -> PayFastGateway {
    PayFastGateway::new(
        PayFastConfig {
            merchant_id: "10000100".into(),
            merchant_key: SecretString::from("46f0cd694581a"),
            passphrase: Some(SecretString::from(PAYFAST_PASSPHRASE)),
            mode: PayFastMode::Sandbox,
            verify_source: false,
        },
        BASE_URL,
        "Kelp Board Bags",
    )
}

/// ITN fields for `order`, before signing.
#[must_use]
pub fn payfast_itn_params(
    order: &Order,
    payment_status: &str,
    pf_payment_id: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("m_payment_id".to_owned(), order.id.to_string()),
        ("pf_payment_id".to_owned(), pf_payment_id.to_owned()),
        ("payment_status".to_owned(), payment_status.to_owned()),
        ("item_name".to_owned(), format!("Order {}", order.order_number)),
        ("amount_gross".to_owned(), format!("{:.2}", round_money(order.total))),
        ("amount_fee".to_owned(), "-4.60".to_owned()),
        ("name_first".to_owned(), "Sipho".to_owned()),
        ("name_last".to_owned(), "Dlamini".to_owned()),
        ("email_address".to_owned(), order.email.to_string()),
        ("merchant_id".to_owned(), "10000100".to_owned()),
    ])
}

/// Sign `params` with [`PAYFAST_PASSPHRASE`] and form-encode them.
#[must_use]
pub fn signed_itn_body(mut params: BTreeMap<String, String>) -> String {
    let signature = payfast::signature(
        params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        Some(PAYFAST_PASSPHRASE),
    );
    params.insert("signature".to_owned(), signature);
    form_encode(&params)
}

#[must_use]
pub fn form_encode(params: &BTreeMap<String, String>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}
