//! Pricing engine.
//!
//! Turns a set of line items, a discount and a destination into cart totals.
//! Everything here is pure and deterministic; the same inputs always produce
//! the same [`Totals`]. No rounding happens mid-calculation.
//!
//! ```text
//! subtotal = Σ unit_price × quantity
//! weight   = Σ quantity × per_item_weight_kg
//! shipping = base + per_kg × weight        (domestic or international rate)
//! discount = clamp(discount_amount, 0, subtotal)
//! tax      = (subtotal − discount) × tax_rate
//! total    = subtotal − discount + shipping + tax
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cart::LineItem;
use crate::types::round_money;

/// Anything with a unit price and a quantity can be priced.
pub trait Priced {
    fn unit_price(&self) -> Decimal;
    fn quantity(&self) -> u32;

    fn line_total(&self) -> Decimal {
        self.unit_price() * Decimal::from(self.quantity())
    }
}

/// Flat-plus-weight shipping rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRate {
    pub base: Decimal,
    pub per_kg: Decimal,
}

impl ShippingRate {
    #[must_use]
    pub fn cost(&self, weight_kg: Decimal) -> Decimal {
        self.base + self.per_kg * weight_kg
    }
}

/// Pricing constants. `Default` matches the shop's published rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRules {
    /// ISO country code of the shop (`ZA`).
    pub home_country: String,
    /// Other spellings of the home country accepted from address forms.
    pub home_country_names: Vec<String>,
    pub tax_rate: Decimal,
    pub per_item_weight_kg: Decimal,
    pub domestic: ShippingRate,
    pub international: ShippingRate,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            home_country: "ZA".to_owned(),
            home_country_names: vec!["South Africa".to_owned()],
            tax_rate: Decimal::new(15, 2),
            per_item_weight_kg: Decimal::new(5, 1),
            domestic: ShippingRate {
                base: Decimal::from(80),
                per_kg: Decimal::from(15),
            },
            international: ShippingRate {
                base: Decimal::from(250),
                per_kg: Decimal::from(50),
            },
        }
    }
}

impl PricingRules {
    #[must_use]
    pub fn is_domestic(&self, country: &str) -> bool {
        let country = country.trim();
        country.eq_ignore_ascii_case(&self.home_country)
            || self
                .home_country_names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(country))
    }

    #[must_use]
    pub fn shipping_rate(&self, weight_kg: Decimal, destination: &str) -> Decimal {
        if self.is_domestic(destination) {
            self.domestic.cost(weight_kg)
        } else {
            self.international.cost(weight_kg)
        }
    }
}

/// Derived monetary figures for a set of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl Totals {
    /// Round each component to cents and recompute the total from the
    /// rounded parts, so `total = subtotal − discount + shipping + tax`
    /// still holds exactly.
    #[must_use]
    pub fn rounded(&self) -> Self {
        let subtotal = round_money(self.subtotal);
        let discount = round_money(self.discount);
        let shipping = round_money(self.shipping);
        let tax = round_money(self.tax);
        Self {
            subtotal,
            discount,
            shipping,
            tax,
            total: subtotal - discount + shipping + tax,
        }
    }

    #[must_use]
    pub fn taxable_amount(&self) -> Decimal {
        self.subtotal - self.discount
    }
}

/// Compute totals for any priced items.
#[must_use]
pub fn compute_totals<P: Priced>(
    items: &[P],
    discount_amount: Decimal,
    destination_country: &str,
    rules: &PricingRules,
) -> Totals {
    let subtotal: Decimal = items.iter().map(Priced::line_total).sum();
    let units: u64 = items.iter().map(|item| u64::from(item.quantity())).sum();
    let weight = Decimal::from(units) * rules.per_item_weight_kg;

    let shipping = rules.shipping_rate(weight, destination_country);
    let discount = discount_amount.max(Decimal::ZERO).min(subtotal);
    let tax = (subtotal - discount) * rules.tax_rate;

    Totals {
        subtotal,
        discount,
        shipping,
        tax,
        total: subtotal - discount + shipping + tax,
    }
}

/// A priced view of the cart. Always derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub items: Vec<LineItem>,
    #[serde(flatten)]
    pub totals: Totals,
}

impl Cart {
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            items: self.items.clone(),
            totals: self.totals.rounded(),
        }
    }
}

/// Price cart line items for a destination.
#[must_use]
pub fn compute_cart(
    items: &[LineItem],
    discount_amount: Decimal,
    destination_country: &str,
    rules: &PricingRules,
) -> Cart {
    Cart {
        items: items.to_vec(),
        totals: compute_totals(items, discount_amount, destination_country, rules),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ProductId;
    use rust_decimal_macros::dec;

    fn item(price: Decimal, quantity: u32) -> LineItem {
        LineItem {
            product_id: ProductId::new(),
            variant_id: None,
            variant_name: None,
            name: "Longboard Bag".into(),
            slug: "longboard-bag".into(),
            unit_price: price,
            image: None,
            quantity,
            max_quantity: 10,
        }
    }

    #[test]
    fn test_single_item_domestic_cart() {
        let rules = PricingRules::default();
        let cart = compute_cart(&[item(dec!(1299.00), 2)], Decimal::ZERO, "ZA", &rules);

        assert_eq!(cart.totals.subtotal, dec!(2598.00));
        // 2 units × 0.5 kg = 1 kg → 80 + 15
        assert_eq!(cart.totals.shipping, dec!(95.0));
        assert_eq!(cart.totals.tax, dec!(389.70));
        assert_eq!(cart.totals.total, dec!(3082.70));
    }

    #[test]
    fn test_home_country_aliases() {
        let rules = PricingRules::default();
        assert!(rules.is_domestic("za"));
        assert!(rules.is_domestic(" south africa "));
        assert!(!rules.is_domestic("NA"));
    }

    #[test]
    fn test_international_shipping() {
        let rules = PricingRules::default();
        let totals = compute_totals(&[item(dec!(100), 3)], Decimal::ZERO, "GB", &rules);
        // 1.5 kg → 250 + 75
        assert_eq!(totals.shipping, dec!(325.0));
    }

    #[test]
    fn test_discount_is_clamped_to_subtotal() {
        let rules = PricingRules::default();
        let totals = compute_totals(&[item(dec!(50), 1)], dec!(80), "ZA", &rules);
        assert_eq!(totals.discount, dec!(50));
        assert_eq!(totals.taxable_amount(), Decimal::ZERO);
        assert_eq!(totals.tax, Decimal::ZERO);
        assert_eq!(totals.total, totals.shipping);

        let negative = compute_totals(&[item(dec!(50), 1)], dec!(-10), "ZA", &rules);
        assert_eq!(negative.discount, Decimal::ZERO);
    }

    #[test]
    fn test_total_identity_holds() {
        let rules = PricingRules::default();
        let items = [item(dec!(333.33), 3), item(dec!(19.99), 7)];
        for discount in [dec!(0), dec!(12.345), dec!(5000)] {
            for country in ["ZA", "US"] {
                let totals = compute_totals(&items, discount, country, &rules);
                assert_eq!(
                    totals.total,
                    totals.subtotal - totals.discount + totals.shipping + totals.tax
                );
                let rounded = totals.rounded();
                assert_eq!(
                    rounded.total,
                    rounded.subtotal - rounded.discount + rounded.shipping + rounded.tax
                );
            }
        }
    }

    #[test]
    fn test_pricing_is_deterministic() {
        let rules = PricingRules::default();
        let items = [item(dec!(1299.00), 2), item(dec!(45.50), 1)];
        let first = compute_cart(&items, dec!(100), "ZA", &rules);
        let second = compute_cart(&items, dec!(100), "ZA", &rules);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_cart_still_charges_base_shipping() {
        let rules = PricingRules::default();
        let totals = compute_totals::<LineItem>(&[], Decimal::ZERO, "ZA", &rules);
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.shipping, dec!(80));
    }

    #[test]
    fn test_cart_serializes_flat_totals() {
        let rules = PricingRules::default();
        let cart = compute_cart(&[item(dec!(10.00), 1)], Decimal::ZERO, "ZA", &rules).rounded();
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(json["subtotal"], "10.00");
        assert!(json["items"].is_array());
    }
}
