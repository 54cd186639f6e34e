//! Session-backed cart persistence.
//!
//! The serialized [`CartState`] lives in the client's server-side session
//! under [`keys::CART`]. Every mutation loads, applies and saves; reads never
//! write.

use serde::Serialize;
use thiserror::Error;
use tower_sessions::Session;

use kelp_core::{CartState, CurrencyCode, LineItem, Money, PricingRules, Totals};

use crate::models::session::keys;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

/// Cart persistence for one client session.
pub struct CartStore {
    session: Session,
}

impl CartStore {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }

    /// Load the stored cart, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Session` if the session store fails.
    pub async fn load(&self) -> Result<CartState, CartError> {
        Ok(self
            .session
            .get::<CartState>(keys::CART)
            .await?
            .unwrap_or_default())
    }

    /// Load, apply `mutate`, save. Returns the saved state and whatever
    /// `mutate` returned.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Session` if the session store fails.
    pub async fn update<F, R>(&self, mutate: F) -> Result<(CartState, R), CartError>
    where
        F: FnOnce(&mut CartState) -> R + Send,
        R: Send,
    {
        let mut cart = self.load().await?;
        let result = mutate(&mut cart);
        self.session.insert(keys::CART, &cart).await?;
        Ok((cart, result))
    }
}

/// Priced cart as returned by the cart API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub items: Vec<LineItem>,
    #[serde(flatten)]
    pub totals: Totals,
    pub item_count: u64,
    pub coupon_code: Option<String>,
    pub formatted: FormattedCart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedCart {
    pub subtotal: String,
    pub discount: String,
    pub shipping: String,
    pub tax: String,
    pub total: String,
}

impl CartView {
    /// Price `state` for the home country. Figures are rounded to cents.
    #[must_use]
    pub fn new(state: &CartState, rules: &PricingRules, currency: CurrencyCode) -> Self {
        let cart = state.cart(rules).rounded();
        let money = |amount| Money::new(amount, currency).to_string();
        let totals = cart.totals;

        Self {
            formatted: FormattedCart {
                subtotal: money(totals.subtotal),
                discount: money(totals.discount),
                shipping: money(totals.shipping),
                tax: money(totals.tax),
                total: money(totals.total),
            },
            items: cart.items,
            totals,
            item_count: state.item_count(),
            coupon_code: state.coupon_code.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kelp_core::ProductId;
    use rust_decimal_macros::dec;
    use tower_sessions::MemoryStore;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    fn fins(quantity: u32) -> LineItem {
        LineItem {
            product_id: ProductId::new(),
            variant_id: None,
            variant_name: None,
            name: "Fin Pouch".into(),
            slug: "fin-pouch".into(),
            unit_price: dec!(249.00),
            image: None,
            quantity,
            max_quantity: 5,
        }
    }

    #[tokio::test]
    async fn test_load_empty_session() {
        let store = CartStore::new(session());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_between_loads() {
        let store = CartStore::new(session());
        let item = fins(1);

        let (_, outcome) = store
            .update(|cart| cart.add_item(item.clone(), 2))
            .await
            .unwrap();
        assert!(outcome.is_added());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.item_count(), 2);
        assert_eq!(loaded.items[0].product_id, item.product_id);
    }

    #[test]
    fn test_cart_view_totals_and_formatting() {
        let mut state = CartState::new();
        state.add_item(fins(1), 2);
        state.apply_coupon("WINTER", dec!(50));

        let view = CartView::new(&state, &PricingRules::default(), CurrencyCode::ZAR);
        // 498 - 50 = 448, VAT 67.20, shipping 80 + 15 * 1kg = 95
        assert_eq!(view.totals.subtotal, dec!(498.00));
        assert_eq!(view.totals.tax, dec!(67.20));
        assert_eq!(view.totals.shipping, dec!(95));
        assert_eq!(view.totals.total, dec!(610.20));
        assert_eq!(view.formatted.total, "R610.20");
        assert_eq!(view.item_count, 2);
        assert_eq!(view.coupon_code.as_deref(), Some("WINTER"));

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("itemCount").is_some());
        assert!(json.get("subtotal").is_some());
    }
}
