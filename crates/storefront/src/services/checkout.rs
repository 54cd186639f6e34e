//! Checkout: validate a submission, re-price it against the catalog and
//! persist the order.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use kelp_core::{
    Address, Email, OrderId, OrderItemId, OrderNumber, OrderStatus, PaymentMethod, PaymentStatus,
    MAX_LINE_QUANTITY, PricingRules, ProductId, VariantId, compute_totals, round_money,
};

use crate::config::ShopConfig;
use crate::db::{Catalog, OrderStore, RepositoryError};
use crate::models::{CatalogProduct, FieldError, Order, OrderItem};

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\s-]+$").expect("Invalid regex"));

fn validate_email(value: &str) -> Result<(), ValidationError> {
    Email::parse(value).map(|_| ()).map_err(|_| {
        ValidationError::new("email").with_message(Cow::Borrowed("Please enter a valid email"))
    })
}

fn validate_payment_method(value: &str) -> Result<(), ValidationError> {
    value.parse::<PaymentMethod>().map(|_| ()).map_err(|_| {
        ValidationError::new("payment_method")
            .with_message(Cow::Borrowed("Please choose a payment method"))
    })
}

const fn default_true() -> bool {
    true
}

/// `POST /api/orders` body.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    #[validate(custom(function = "validate_email"))]
    pub email: String,
    #[serde(default)]
    #[validate(regex(path = *PHONE_PATTERN, message = "Invalid phone number"))]
    pub phone: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "First name is required"))]
    pub shipping_first_name: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Last name is required"))]
    pub shipping_last_name: String,
    #[serde(default)]
    pub shipping_company: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "Address is required"))]
    pub shipping_address1: String,
    #[serde(default)]
    pub shipping_address2: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "City is required"))]
    pub shipping_city: String,
    #[serde(default)]
    pub shipping_province: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub shipping_postal_code: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Country is required"))]
    pub shipping_country: String,
    #[serde(default)]
    #[validate(regex(path = *PHONE_PATTERN, message = "Invalid phone number"))]
    pub shipping_phone: String,

    #[serde(default = "default_true")]
    pub same_as_shipping: bool,
    #[serde(default)]
    #[validate(nested)]
    pub billing_address: Option<AddressInput>,

    #[serde(default)]
    pub customer_notes: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_payment_method"))]
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, message = "Your cart is empty"), nested)]
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub cart: ClientTotals,
}

/// A billing address entered separately from the shipping address.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
    #[validate(length(min = 1, message = "First name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "Last name is required"))]
    pub last_name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address1: String,
    #[serde(default)]
    pub address2: Option<String>,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[serde(default)]
    pub province: Option<String>,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, message = "Country is required"))]
    pub country: String,
    #[serde(default)]
    pub phone: String,
}

/// One requested line. Display fields and prices sent by the client are
/// ignored; the catalog is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: u32,
}

/// Totals as the client computed them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTotals {
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub total: Decimal,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout: {} field error(s)", .0.len())]
    Invalid(Vec<FieldError>),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CheckoutRequest {
    /// Every field-level problem with the submission, sorted by field.
    #[must_use]
    pub fn field_errors(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if let Err(validation) = self.validate() {
            flatten_errors(&validation, "", &mut errors);
        }
        if !self.same_as_shipping && self.billing_address.is_none() {
            errors.push(FieldError::new(
                "billingAddress",
                "Billing address is required",
            ));
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity > MAX_LINE_QUANTITY {
                errors.push(FieldError::new(
                    format!("items[{index}].quantity"),
                    format!("Quantity cannot exceed {MAX_LINE_QUANTITY}"),
                ));
            }
        }
        errors.sort_by(|a, b| a.field.cmp(&b.field));
        errors
    }

    /// The chosen method, once [`field_errors`](Self::field_errors) is empty.
    #[must_use]
    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method.parse().ok()
    }

    fn shipping_address(&self) -> Address {
        Address {
            first_name: self.shipping_first_name.trim().to_owned(),
            last_name: self.shipping_last_name.trim().to_owned(),
            company: non_empty(self.shipping_company.as_deref()),
            address1: self.shipping_address1.trim().to_owned(),
            address2: non_empty(self.shipping_address2.as_deref()),
            city: self.shipping_city.trim().to_owned(),
            province: non_empty(self.shipping_province.as_deref()),
            postal_code: self.shipping_postal_code.trim().to_owned(),
            country: self.shipping_country.trim().to_owned(),
            phone: self.shipping_phone.trim().to_owned(),
        }
    }

    fn billing_address(&self, shipping: &Address) -> Address {
        match (&self.billing_address, self.same_as_shipping) {
            (Some(billing), false) => Address {
                first_name: billing.first_name.trim().to_owned(),
                last_name: billing.last_name.trim().to_owned(),
                company: non_empty(billing.company.as_deref()),
                address1: billing.address1.trim().to_owned(),
                address2: non_empty(billing.address2.as_deref()),
                city: billing.city.trim().to_owned(),
                province: non_empty(billing.province.as_deref()),
                postal_code: billing.postal_code.trim().to_owned(),
                country: billing.country.trim().to_owned(),
                phone: billing.phone.trim().to_owned(),
            },
            _ => shipping.clone(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// `shipping_first_name` -> `shippingFirstName`.
fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for ch in name.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn flatten_errors(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldError>) {
    for (name, kind) in errors.errors() {
        let field = format!("{prefix}{}", camel_case(name));
        match kind {
            ValidationErrorsKind::Field(list) => {
                out.extend(list.iter().map(|error| {
                    let message = error
                        .message
                        .as_ref()
                        .map_or_else(|| error.code.to_string(), ToString::to_string);
                    FieldError::new(field.clone(), message)
                }));
            }
            ValidationErrorsKind::Struct(nested) => {
                flatten_errors(nested, &format!("{field}."), out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    flatten_errors(nested, &format!("{field}[{index}]."), out);
                }
            }
        }
    }
}

/// Validate, re-price and persist a checkout. The order is created
/// `PENDING`/`PENDING`; nothing is written if validation fails.
///
/// # Errors
///
/// Returns `CheckoutError::Invalid` with field-level details when the
/// submission or the catalog check fails, and `CheckoutError::Repository`
/// when the order cannot be stored (including a second order-number
/// conflict).
#[tracing::instrument(
    skip_all,
    fields(payment_method = %request.payment_method, items = request.items.len())
)]
pub async fn place_order<S, C>(
    store: &S,
    catalog: &C,
    rules: &PricingRules,
    shop: &ShopConfig,
    request: &CheckoutRequest,
) -> Result<Order, CheckoutError>
where
    S: OrderStore,
    C: Catalog,
{
    let errors = request.field_errors();
    if !errors.is_empty() {
        tracing::info!(errors = errors.len(), "checkout rejected");
        return Err(CheckoutError::Invalid(errors));
    }
    let email = Email::parse(&request.email)
        .map_err(|_| CheckoutError::Invalid(vec![FieldError::new("email", "Please enter a valid email")]))?;
    let Some(payment_method) = request.payment_method() else {
        return Err(CheckoutError::Invalid(vec![FieldError::new(
            "paymentMethod",
            "Please choose a payment method",
        )]));
    };

    let items = price_items(catalog, &request.items).await?;

    let shipping_address = request.shipping_address();
    let billing_address = request.billing_address(&shipping_address);
    let totals = compute_totals(
        &items,
        request.cart.discount,
        &shipping_address.country,
        rules,
    )
    .rounded();

    if round_money(request.cart.total) != totals.total {
        tracing::warn!(
            client_total = %request.cart.total,
            server_total = %totals.total,
            "client cart total differs from server pricing, using server figures"
        );
    }

    let now = chrono::Utc::now();
    let mut order = Order {
        id: OrderId::new(),
        order_number: OrderNumber::generate(&shop.order_number_prefix),
        email,
        phone: request.phone.trim().to_owned(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_method,
        payment_id: None,
        payment_data: None,
        subtotal: totals.subtotal,
        discount: totals.discount,
        shipping_cost: totals.shipping,
        tax: totals.tax,
        total: totals.total,
        currency: shop.currency,
        coupon_code: non_empty(request.coupon_code.as_deref()),
        shipping_address,
        billing_address,
        customer_notes: non_empty(request.customer_notes.as_deref()),
        items,
        created_at: now,
        updated_at: now,
    };

    match store.insert(&order).await {
        Ok(()) => {}
        Err(RepositoryError::Conflict(_)) => {
            tracing::warn!(order_number = %order.order_number, "order number collision, regenerating");
            order.order_number = OrderNumber::generate(&shop.order_number_prefix);
            store.insert(&order).await?;
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total = %order.total,
        "order created"
    );
    Ok(order)
}

/// Snapshot catalog data into order items, rejecting unknown, inactive or
/// out-of-stock products.
async fn price_items<C: Catalog>(
    catalog: &C,
    requested: &[CheckoutItem],
) -> Result<Vec<OrderItem>, CheckoutError> {
    let ids: Vec<ProductId> = requested.iter().map(|item| item.product_id).collect();
    let products: HashMap<ProductId, CatalogProduct> = catalog
        .products(&ids)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    // Units per product across variants, for the stock check.
    let mut units: HashMap<ProductId, u32> = HashMap::new();
    for item in requested {
        let total = units.entry(item.product_id).or_default();
        *total = total.saturating_add(item.quantity);
    }

    let mut errors = Vec::new();
    let mut items = Vec::with_capacity(requested.len());
    for (index, item) in requested.iter().enumerate() {
        let field = format!("items[{index}].productId");
        let Some(product) = products.get(&item.product_id).filter(|p| p.active) else {
            errors.push(FieldError::new(field, "Product is no longer available"));
            continue;
        };
        let wanted = units.get(&item.product_id).copied().unwrap_or(item.quantity);
        if !product.can_fulfil(wanted) {
            errors.push(FieldError::new(
                field,
                format!("Only {} left in stock", product.inventory.max(0)),
            ));
            continue;
        }

        let price = round_money(product.price);
        items.push(OrderItem {
            id: OrderItemId::new(),
            product_id: product.id,
            variant_id: item.variant_id,
            variant_name: non_empty(item.variant_name.as_deref()),
            product_name: product.name.clone(),
            product_slug: product.slug.clone(),
            product_image: product.image.clone(),
            quantity: item.quantity,
            price,
            total: round_money(price * Decimal::from(item.quantity)),
        });
    }

    if errors.is_empty() {
        Ok(items)
    } else {
        Err(CheckoutError::Invalid(errors))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{MemoryCatalog, MemoryOrderStore};
    use rust_decimal_macros::dec;

    pub(crate) fn longboard_bag() -> CatalogProduct {
        CatalogProduct {
            id: ProductId::new(),
            name: "Longboard Bag".into(),
            slug: "longboard-bag".into(),
            price: dec!(1299.00),
            inventory: 10,
            track_inventory: true,
            active: true,
            image: Some("/images/longboard-bag.jpg".into()),
        }
    }

    pub(crate) fn request(product: ProductId, quantity: u32, method: PaymentMethod) -> CheckoutRequest {
        serde_json::from_value(serde_json::json!({
            "email": "thandi@example.co.za",
            "phone": "+27 82 555 0101",
            "shippingFirstName": "Thandi",
            "shippingLastName": "Mokoena",
            "shippingAddress1": "12 Beach Road",
            "shippingCity": "Cape Town",
            "shippingProvince": "Western Cape",
            "shippingPostalCode": "8005",
            "shippingCountry": "ZA",
            "shippingPhone": "+27 82 555 0101",
            "paymentMethod": method.as_str(),
            "customerNotes": "Please gift wrap",
            "items": [{ "productId": product.to_string(), "quantity": quantity, "price": "1.00" }],
            "cart": { "discount": "0", "total": "3082.70" }
        }))
        .unwrap()
    }

    fn setup() -> (MemoryOrderStore, MemoryCatalog, CatalogProduct) {
        let product = longboard_bag();
        let catalog = MemoryCatalog::new([product.clone()]);
        (MemoryOrderStore::new(), catalog, product)
    }

    #[tokio::test]
    async fn test_place_order_prices_from_catalog() {
        let (store, catalog, product) = setup();
        let request = request(product.id, 2, PaymentMethod::PayFast);

        let order = place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request)
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.subtotal, dec!(2598.00));
        assert_eq!(order.shipping_cost, dec!(95.00));
        assert_eq!(order.tax, dec!(389.70));
        assert_eq!(order.total, dec!(3082.70));
        assert_eq!(order.items[0].price, dec!(1299.00));
        assert_eq!(order.items[0].product_name, "Longboard Bag");
        assert_eq!(order.billing_address, order.shipping_address);
        assert!(order.order_number.as_str().starts_with("KBB-"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_international_shipping_uses_destination() {
        let (store, catalog, product) = setup();
        let mut request = request(product.id, 2, PaymentMethod::Stripe);
        request.shipping_country = "Namibia".into();

        let order = place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request)
            .await
            .unwrap();
        assert_eq!(order.shipping_cost, dec!(300.00));
    }

    #[tokio::test]
    async fn test_discount_is_clamped_and_untaxed() {
        let (store, catalog, product) = setup();
        let mut request = request(product.id, 1, PaymentMethod::Stripe);
        request.cart.discount = dec!(5000);

        let order = place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request)
            .await
            .unwrap();
        assert_eq!(order.discount, dec!(1299.00));
        assert_eq!(order.tax, dec!(0));
        assert_eq!(order.total, order.shipping_cost);
    }

    #[tokio::test]
    async fn test_validation_errors_are_field_level() {
        let (store, catalog, product) = setup();
        let mut request = request(product.id, 1, PaymentMethod::PayFast);
        request.email = "not-an-email".into();
        request.phone = "call me".into();
        request.shipping_city = String::new();
        request.same_as_shipping = false;

        let Err(CheckoutError::Invalid(errors)) =
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request).await
        else {
            panic!("expected validation failure");
        };

        assert!(errors.contains(&FieldError::new("email", "Please enter a valid email")));
        assert!(errors.contains(&FieldError::new("phone", "Invalid phone number")));
        assert!(errors.contains(&FieldError::new("shippingCity", "City is required")));
        assert!(errors.contains(&FieldError::new("billingAddress", "Billing address is required")));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_nested_item_errors() {
        let (store, catalog, product) = setup();
        let mut request = request(product.id, 1, PaymentMethod::PayFast);
        request.items[0].quantity = 0;

        let Err(CheckoutError::Invalid(errors)) =
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request).await
        else {
            panic!("expected validation failure");
        };
        assert_eq!(
            errors,
            vec![FieldError::new("items[0].quantity", "Quantity must be at least 1")]
        );

        request.items.clear();
        assert_eq!(
            request.field_errors(),
            vec![FieldError::new("items", "Your cart is empty")]
        );
    }

    #[tokio::test]
    async fn test_payment_method_and_missing_fields_are_field_errors() {
        let (store, catalog, product) = setup();
        let mut request = request(product.id, 1, PaymentMethod::Stripe);
        request.payment_method = "PAYPAL".into();

        let Err(CheckoutError::Invalid(errors)) =
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request).await
        else {
            panic!("expected validation failure");
        };
        assert_eq!(
            errors,
            vec![FieldError::new("paymentMethod", "Please choose a payment method")]
        );

        request.payment_method = "payfast".into();
        assert!(request.field_errors().is_empty());
        assert_eq!(request.payment_method(), Some(PaymentMethod::PayFast));

        let sparse: CheckoutRequest = serde_json::from_value(serde_json::json!({
            "email": "thandi@example.co.za",
            "items": [{ "productId": product.id.to_string(), "quantity": 1 }],
        }))
        .unwrap();
        let fields: Vec<String> = sparse.field_errors().into_iter().map(|e| e.field).collect();
        for field in ["paymentMethod", "phone", "shippingCity", "shippingFirstName"] {
            assert!(fields.iter().any(|f| f == field), "missing {field}");
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_quantity_upper_bound() {
        let mut request = request(ProductId::new(), MAX_LINE_QUANTITY, PaymentMethod::Stripe);
        assert!(request.field_errors().is_empty());

        request.items[0].quantity = MAX_LINE_QUANTITY + 1;
        assert_eq!(
            request.field_errors(),
            vec![FieldError::new(
                "items[0].quantity",
                format!("Quantity cannot exceed {MAX_LINE_QUANTITY}")
            )]
        );
    }

    #[tokio::test]
    async fn test_order_is_a_snapshot() {
        let (store, catalog, product) = setup();
        let mut request = request(product.id, 2, PaymentMethod::PayFast);
        let order = place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request)
            .await
            .unwrap();

        catalog.upsert(CatalogProduct {
            name: "Longboard Bag (2027)".into(),
            slug: "longboard-bag-2027".into(),
            price: dec!(1899.00),
            image: Some("/images/longboard-bag-2027.jpg".into()),
            ..product.clone()
        });
        request.items[0].quantity = 7;
        request.items[0].variant_name = Some("9'6\"".into());
        request.shipping_country = "Namibia".into();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.subtotal, dec!(2598.00));
        assert_eq!(stored.shipping_cost, dec!(95.00));
        assert_eq!(stored.total, dec!(3082.70));
        assert_eq!(stored.shipping_address.country, "ZA");

        let item = &stored.items[0];
        assert_eq!(item.product_name, "Longboard Bag");
        assert_eq!(item.product_slug, "longboard-bag");
        assert_eq!(item.product_image.as_deref(), Some("/images/longboard-bag.jpg"));
        assert_eq!(item.price, dec!(1299.00));
        assert_eq!(item.quantity, 2);
        assert_eq!(item.total, dec!(2598.00));
        assert_eq!(item.variant_name, None);
        assert_eq!(stored.items, order.items);
    }

    #[tokio::test]
    async fn test_catalog_rejections() {
        let (store, catalog, product) = setup();

        let unknown = request(ProductId::new(), 1, PaymentMethod::Stripe);
        let Err(CheckoutError::Invalid(errors)) =
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &unknown).await
        else {
            panic!("expected unknown product to be rejected");
        };
        assert_eq!(errors[0].field, "items[0].productId");

        let too_many = request(product.id, 11, PaymentMethod::Stripe);
        let Err(CheckoutError::Invalid(errors)) =
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &too_many).await
        else {
            panic!("expected stock check to fail");
        };
        assert_eq!(errors[0].message, "Only 10 left in stock");

        catalog.upsert(CatalogProduct {
            active: false,
            ..product.clone()
        });
        let inactive = request(product.id, 1, PaymentMethod::Stripe);
        assert!(matches!(
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &inactive).await,
            Err(CheckoutError::Invalid(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_order_number_conflict_is_retried_once() {
        let product = longboard_bag();
        let catalog = MemoryCatalog::new([product.clone()]);
        let request = request(product.id, 1, PaymentMethod::WhatsApp);

        let store = MemoryOrderStore::with_forced_conflicts(1);
        assert!(
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request)
                .await
                .is_ok()
        );

        let store = MemoryOrderStore::with_forced_conflicts(2);
        assert!(matches!(
            place_order(&store, &catalog, &PricingRules::default(), &ShopConfig::default(), &request).await,
            Err(CheckoutError::Repository(RepositoryError::Conflict(_)))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("shipping_postal_code"), "shippingPostalCode");
        assert_eq!(camel_case("email"), "email");
        assert_eq!(camel_case("address1"), "address1");
    }
}
