//! Catalog products, read-only from the storefront's point of view.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kelp_core::ProductId;

/// Authoritative product data used to re-price a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub price: Decimal,
    pub inventory: i32,
    pub track_inventory: bool,
    pub active: bool,
    pub image: Option<String>,
}

impl CatalogProduct {
    /// Whether `quantity` units can be sold right now.
    #[must_use]
    pub fn can_fulfil(&self, quantity: u32) -> bool {
        if !self.track_inventory {
            return true;
        }
        i64::from(self.inventory) >= i64::from(quantity)
    }
}
