//! Session-related types.

/// Session keys for storefront data.
pub mod keys {
    /// Key for the serialized cart state (`{items, couponCode, discountAmount}`).
    pub const CART: &str = "kelp-cart-storage";
}
