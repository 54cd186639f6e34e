//! Cart state and its mutation rules.
//!
//! `CartState` is what gets persisted per client. Totals are never stored;
//! they are derived through [`crate::pricing`] every time the cart is read.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::{Cart, Priced, PricingRules, compute_cart};
use crate::types::{ProductId, VariantId};

/// Largest unit price a cart line accepts (R1,000,000,000).
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Largest quantity, or max quantity, a cart line accepts.
pub const MAX_LINE_QUANTITY: u32 = 10_000;

/// A cart line rejected before it reaches the cart.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LineItemError {
    #[error("Quantity must be at least 1")]
    ZeroQuantity,
    #[error("Quantity cannot exceed {max}")]
    QuantityTooLarge { max: u32 },
    #[error("Price cannot be negative")]
    NegativePrice,
    #[error("Price cannot exceed {max}")]
    PriceTooLarge { max: Decimal },
}

/// One product (or product variant) in the cart.
///
/// Identity is `(product_id, variant_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    #[serde(default)]
    pub variant_name: Option<String>,
    pub name: String,
    pub slug: String,
    #[serde(rename = "price")]
    pub unit_price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: u32,
    pub max_quantity: u32,
}

impl LineItem {
    #[must_use]
    pub fn matches(&self, product_id: ProductId, variant_id: Option<VariantId>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }

    /// Check that adding `quantity` of this line stays within the cart's
    /// numeric bounds.
    ///
    /// # Errors
    ///
    /// Returns the first [`LineItemError`] the line breaks.
    pub fn check(&self, quantity: u32) -> Result<(), LineItemError> {
        if quantity == 0 {
            return Err(LineItemError::ZeroQuantity);
        }
        if quantity > MAX_LINE_QUANTITY || self.max_quantity > MAX_LINE_QUANTITY {
            return Err(LineItemError::QuantityTooLarge {
                max: MAX_LINE_QUANTITY,
            });
        }
        if self.unit_price < Decimal::ZERO {
            return Err(LineItemError::NegativePrice);
        }
        if self.unit_price > MAX_UNIT_PRICE {
            return Err(LineItemError::PriceTooLarge {
                max: MAX_UNIT_PRICE,
            });
        }
        Ok(())
    }

    /// Like [`matches`](Self::matches), but `None` selects every variant.
    fn selected_by(&self, product_id: ProductId, variant_id: Option<VariantId>) -> bool {
        self.product_id == product_id && variant_id.is_none_or(|v| self.variant_id == Some(v))
    }
}

impl Priced for LineItem {
    fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    fn quantity(&self) -> u32 {
        self.quantity
    }
}

/// Result of [`CartState::add_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    /// A new line was appended.
    Inserted,
    /// An existing line's quantity was raised.
    Increased,
    /// The increase would exceed the line's max quantity; nothing changed.
    Rejected,
}

impl AddOutcome {
    #[must_use]
    pub const fn is_added(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub discount_amount: Decimal,
}

impl CartState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` units of `item`.
    ///
    /// For a line already in the cart the new quantity is applied only if it
    /// stays within that line's `max_quantity`; otherwise the cart is left
    /// untouched. A new line is inserted with the quantity as given.
    pub fn add_item(&mut self, mut item: LineItem, quantity: u32) -> AddOutcome {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|existing| existing.matches(item.product_id, item.variant_id))
        {
            let requested = existing.quantity.saturating_add(quantity);
            if requested > existing.max_quantity {
                return AddOutcome::Rejected;
            }
            existing.quantity = requested;
            return AddOutcome::Increased;
        }

        item.quantity = quantity;
        self.items.push(item);
        AddOutcome::Inserted
    }

    /// Remove one variant, or every variant of the product when `variant_id`
    /// is `None`.
    pub fn remove_item(&mut self, product_id: ProductId, variant_id: Option<VariantId>) {
        self.items
            .retain(|item| !item.selected_by(product_id, variant_id));
    }

    /// Set the quantity of the matching line(s), clamped to each line's
    /// `max_quantity`. Zero or negative removes them.
    pub fn update_quantity(
        &mut self,
        product_id: ProductId,
        quantity: i64,
        variant_id: Option<VariantId>,
    ) {
        if quantity <= 0 {
            self.remove_item(product_id, variant_id);
            return;
        }

        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.selected_by(product_id, variant_id))
        {
            item.quantity = quantity.min(item.max_quantity);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn apply_coupon(&mut self, code: impl Into<String>, discount_amount: Decimal) {
        self.coupon_code = Some(code.into());
        self.discount_amount = discount_amount;
    }

    pub fn remove_coupon(&mut self) {
        self.coupon_code = None;
        self.discount_amount = Decimal::ZERO;
    }

    /// Priced view, shipped to the home country.
    #[must_use]
    pub fn cart(&self, rules: &PricingRules) -> Cart {
        compute_cart(
            &self.items,
            self.discount_amount,
            &rules.home_country,
            rules,
        )
    }

    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(id: ProductId, max_quantity: u32) -> LineItem {
        LineItem {
            product_id: id,
            variant_id: None,
            variant_name: None,
            name: "Shortboard Day Bag".into(),
            slug: "shortboard-day-bag".into(),
            unit_price: dec!(1299.00),
            image: Some("/images/day-bag.jpg".into()),
            quantity: 1,
            max_quantity,
        }
    }

    fn variant(id: ProductId, variant: VariantId, max_quantity: u32) -> LineItem {
        LineItem {
            variant_id: Some(variant),
            variant_name: Some("6'0\"".into()),
            ..product(id, max_quantity)
        }
    }

    #[test]
    fn test_line_bounds() {
        let p1 = ProductId::new();
        assert!(product(p1, 5).check(2).is_ok());
        assert_eq!(product(p1, 5).check(0), Err(LineItemError::ZeroQuantity));
        assert_eq!(
            product(p1, 5).check(MAX_LINE_QUANTITY + 1),
            Err(LineItemError::QuantityTooLarge { max: MAX_LINE_QUANTITY })
        );
        assert!(matches!(
            product(p1, u32::MAX).check(1),
            Err(LineItemError::QuantityTooLarge { .. })
        ));

        let negative = LineItem {
            unit_price: dec!(-1),
            ..product(p1, 5)
        };
        assert_eq!(negative.check(1), Err(LineItemError::NegativePrice));

        let huge = LineItem {
            unit_price: Decimal::MAX,
            ..product(p1, 5)
        };
        assert!(matches!(huge.check(2), Err(LineItemError::PriceTooLarge { .. })));

        let ceiling = LineItem {
            unit_price: MAX_UNIT_PRICE,
            ..product(p1, MAX_LINE_QUANTITY)
        };
        assert!(ceiling.check(MAX_LINE_QUANTITY).is_ok());
        let mut cart = CartState::new();
        cart.add_item(ceiling, MAX_LINE_QUANTITY);
        let priced = cart.cart(&PricingRules::default());
        assert_eq!(priced.totals.subtotal, Decimal::from(10_000_000_000_000_i64));
    }

    #[test]
    fn test_add_over_max_is_rejected() {
        let p1 = ProductId::new();
        let mut cart = CartState::new();

        assert_eq!(cart.add_item(product(p1, 3), 2), AddOutcome::Inserted);
        assert_eq!(cart.add_item(product(p1, 3), 2), AddOutcome::Rejected);

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[test]
    fn test_add_within_max_increases() {
        let p1 = ProductId::new();
        let mut cart = CartState::new();
        cart.add_item(product(p1, 3), 1);
        assert_eq!(cart.add_item(product(p1, 3), 2), AddOutcome::Increased);
        assert_eq!(cart.items[0].quantity, 3);
    }

    #[test]
    fn test_new_item_is_not_clamped() {
        let mut cart = CartState::new();
        cart.add_item(product(ProductId::new(), 2), 5);
        assert_eq!(cart.items[0].quantity, 5);
    }

    #[test]
    fn test_variants_are_separate_lines() {
        let p1 = ProductId::new();
        let (v1, v2) = (VariantId::new(), VariantId::new());
        let mut cart = CartState::new();
        cart.add_item(variant(p1, v1, 5), 1);
        cart.add_item(variant(p1, v2, 5), 1);
        cart.add_item(product(p1, 5), 1);
        assert_eq!(cart.items.len(), 3);

        cart.remove_item(p1, Some(v1));
        assert_eq!(cart.items.len(), 2);

        cart.remove_item(p1, None);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_update_quantity_zero_removes() {
        let p1 = ProductId::new();
        let mut cart = CartState::new();
        cart.add_item(product(p1, 3), 1);

        let mut removed = cart.clone();
        removed.remove_item(p1, None);

        cart.update_quantity(p1, 0, None);
        assert_eq!(cart, removed);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_update_quantity_negative_removes() {
        let p1 = ProductId::new();
        let mut cart = CartState::new();
        cart.add_item(product(p1, 3), 1);
        cart.update_quantity(p1, -4, None);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_update_quantity_clamps_to_max() {
        let p1 = ProductId::new();
        let mut cart = CartState::new();
        cart.add_item(product(p1, 3), 1);
        cart.update_quantity(p1, 10, None);
        assert_eq!(cart.items[0].quantity, 3);
        cart.update_quantity(p1, 2, None);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[test]
    fn test_update_quantity_without_variant_hits_all_variants() {
        let p1 = ProductId::new();
        let mut cart = CartState::new();
        cart.add_item(variant(p1, VariantId::new(), 4), 1);
        cart.add_item(variant(p1, VariantId::new(), 2), 1);
        cart.update_quantity(p1, 3, None);
        let quantities: Vec<u32> = cart.items.iter().map(|i| i.quantity).collect();
        assert_eq!(quantities, vec![3, 2]);
    }

    #[test]
    fn test_coupon_and_clear() {
        let mut cart = CartState::new();
        cart.add_item(product(ProductId::new(), 3), 2);
        cart.apply_coupon("SURF10", dec!(100));
        assert_eq!(cart.coupon_code.as_deref(), Some("SURF10"));

        let priced = cart.cart(&PricingRules::default());
        assert_eq!(priced.totals.discount, dec!(100));

        cart.remove_coupon();
        assert_eq!(cart.discount_amount, Decimal::ZERO);
        assert!(cart.coupon_code.is_none());

        cart.apply_coupon("SURF10", dec!(100));
        cart.clear();
        assert_eq!(cart, CartState::default());
    }

    #[test]
    fn test_item_count_sums_quantities() {
        let mut cart = CartState::new();
        cart.add_item(product(ProductId::new(), 3), 2);
        cart.add_item(product(ProductId::new(), 3), 3);
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn test_cart_prices_for_home_country() {
        let mut cart = CartState::new();
        cart.add_item(product(ProductId::new(), 3), 2);
        let priced = cart.cart(&PricingRules::default());
        assert_eq!(priced.totals.subtotal, dec!(2598.00));
        assert_eq!(priced.totals.tax, dec!(389.70));
        assert_eq!(priced.totals.shipping, dec!(95));
    }

    #[test]
    fn test_persisted_shape() {
        let mut cart = CartState::new();
        cart.add_item(product(ProductId::new(), 3), 1);
        cart.apply_coupon("SURF10", dec!(50));
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(json["couponCode"], "SURF10");
        assert_eq!(json["discountAmount"], "50");
        assert_eq!(json["items"][0]["maxQuantity"], 3);
        assert_eq!(json["items"][0]["price"], "1299.00");

        let restored: CartState = serde_json::from_value(json).unwrap();
        assert_eq!(restored, cart);
    }
}
