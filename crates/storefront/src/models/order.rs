//! Order domain types.
//!
//! An [`Order`] is a frozen snapshot: prices, names and addresses are copied
//! in at checkout and never re-derived from the catalog afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kelp_core::{
    Address, CurrencyCode, Email, Money, OrderId, OrderItemId, OrderNumber, OrderStatus,
    PaymentMethod, PaymentOutcome, PaymentStatus, Priced, ProductId, Totals, VariantId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub email: Email,
    pub phone: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<String>,
    /// Raw provider payload, kept for audit and never sent to clients.
    #[serde(default, skip_serializing)]
    pub payment_data: Option<serde_json::Value>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub customer_notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: OrderItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub variant_name: Option<String>,
    pub product_name: String,
    pub product_slug: String,
    pub product_image: Option<String>,
    pub quantity: u32,
    pub price: Decimal,
    pub total: Decimal,
}

impl Priced for OrderItem {
    fn unit_price(&self) -> Decimal {
        self.price
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }
}

impl OrderItem {
    /// Display name including the variant, e.g. `Longboard Bag (9'6")`.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.variant_name.as_deref().map(str::trim) {
            Some(variant) if !variant.is_empty() => format!("{} ({variant})", self.product_name),
            _ => self.product_name.clone(),
        }
    }
}

impl Order {
    #[must_use]
    pub const fn totals(&self) -> Totals {
        Totals {
            subtotal: self.subtotal,
            discount: self.discount,
            shipping: self.shipping_cost,
            tax: self.tax,
            total: self.total,
        }
    }

    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    #[must_use]
    pub fn customer_name(&self) -> String {
        self.shipping_address.full_name()
    }

    #[must_use]
    pub const fn money(&self, amount: Decimal) -> Money {
        Money::new(amount, self.currency)
    }

    #[must_use]
    pub fn formatted(&self) -> FormattedTotals {
        FormattedTotals {
            subtotal: self.money(self.subtotal).to_string(),
            discount: self.money(self.discount).to_string(),
            shipping: self.money(self.shipping_cost).to_string(),
            tax: self.money(self.tax).to_string(),
            total: self.money(self.total).to_string(),
        }
    }

    /// Whether the customer may (re)start payment.
    #[must_use]
    pub const fn accepts_payment(&self) -> bool {
        self.payment_status.accepts_payment()
    }
}

/// Currency strings for display, e.g. `R2,598.00`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedTotals {
    pub subtotal: String,
    pub discount: String,
    pub shipping: String,
    pub tax: String,
    pub total: String,
}

/// A verified, normalized provider notification ready to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub order_id: OrderId,
    pub provider: PaymentMethod,
    /// Provider-side id (session, payment intent or `pf_payment_id`).
    pub external_id: String,
    pub outcome: PaymentOutcome,
    pub payload: serde_json::Value,
}

/// Result of applying a [`PaymentUpdate`] to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTransition {
    /// The order moved to the outcome's status.
    Applied,
    /// This exact notification was processed before.
    Duplicate,
    /// Recorded, but the order's current status does not accept the outcome.
    Unchanged,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use kelp_core::{PricingRules, compute_totals};
    use rust_decimal_macros::dec;

    pub fn address() -> Address {
        Address {
            first_name: "Thandi".into(),
            last_name: "Mokoena".into(),
            company: None,
            address1: "12 Beach Road".into(),
            address2: None,
            city: "Cape Town".into(),
            province: Some("Western Cape".into()),
            postal_code: "8005".into(),
            country: "ZA".into(),
            phone: "+27 82 000 0000".into(),
        }
    }

    pub fn item(price: Decimal, quantity: u32) -> OrderItem {
        OrderItem {
            id: OrderItemId::new(),
            product_id: ProductId::new(),
            variant_id: None,
            variant_name: None,
            product_name: "Longboard Bag".into(),
            product_slug: "longboard-bag".into(),
            product_image: None,
            quantity,
            price,
            total: price * Decimal::from(quantity),
        }
    }

    /// A pending order for one longboard bag ×2 shipped within South Africa.
    pub fn order(method: PaymentMethod) -> Order {
        let items = vec![item(dec!(1299.00), 2)];
        let totals = compute_totals(&items, Decimal::ZERO, "ZA", &PricingRules::default()).rounded();
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            order_number: OrderNumber::generate("KBB"),
            email: Email::parse("thandi@example.co.za").unwrap_or_else(|_| unreachable!()),
            phone: "+27 82 000 0000".into(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: method,
            payment_id: None,
            payment_data: None,
            subtotal: totals.subtotal,
            discount: totals.discount,
            shipping_cost: totals.shipping,
            tax: totals.tax,
            total: totals.total,
            currency: CurrencyCode::ZAR,
            coupon_code: None,
            shipping_address: address(),
            billing_address: address(),
            customer_notes: Some("Please gift wrap".into()),
            items,
            created_at: now,
            updated_at: now,
        }
    }
}
