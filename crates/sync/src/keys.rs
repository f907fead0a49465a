//! Persisted cache key layout.
//!
//! The exact key strings are part of the storage contract: other tabs route
//! change notices by key, so renaming any of them breaks cross-component
//! coupling.

use cartsync_core::UserId;

/// Key for the stored identity blob.
pub const USER: &str = "user";

/// Key for the guest cart line array.
pub const CART: &str = "cart";

/// Key for the wishlist product-id array (device-local).
pub const WISHLIST: &str = "wishlist";

/// Key for the TTL-less category cache.
pub const CACHED_CATEGORIES: &str = "cachedCategories";

/// Global fallback for the last displayed cart count.
pub const LAST_CART_COUNT: &str = "lastCartCount";

/// Global fallback for the last displayed wishlist count.
pub const LAST_WISHLIST_COUNT: &str = "lastWishlistCount";

/// Per-user cart counter key.
#[must_use]
pub fn cart_count(user: UserId) -> String {
    format!("cartCount_{user}")
}

/// Per-user wishlist counter key.
#[must_use]
pub fn wishlist_count(user: UserId) -> String {
    format!("wishlistCount_{user}")
}

/// The family of state a persisted key belongs to.
///
/// Used to route cross-tab storage notices to the matching recompute signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Cart,
    Wishlist,
    Categories,
    Identity,
    Other,
}

/// Classify a persisted key into its [`KeyFamily`].
#[must_use]
pub fn family(key: &str) -> KeyFamily {
    match key {
        CART | LAST_CART_COUNT => KeyFamily::Cart,
        WISHLIST | LAST_WISHLIST_COUNT => KeyFamily::Wishlist,
        CACHED_CATEGORIES => KeyFamily::Categories,
        USER => KeyFamily::Identity,
        other if other.starts_with("cartCount_") => KeyFamily::Cart,
        other if other.starts_with("wishlistCount_") => KeyFamily::Wishlist,
        _ => KeyFamily::Other,
    }
}
