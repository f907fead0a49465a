//! The consolidated mutation surface UI components call.
//!
//! The storefront used to duplicate these handlers across every navbar
//! revision and product card; here they live once, with the store and bus
//! injected. Every successful mutation persists first, then dispatches the
//! matching signals before returning, so mounted subscribers recompute in
//! the same turn.

use std::sync::Arc;

use tracing::instrument;

use cartsync_core::ProductId;

use crate::api::{ApiError, CartApi};
use crate::events::{EventBus, SyncEvent};
use crate::models::{CartLine, Category, MAX_LINE_QUANTITY};
use crate::projector::cart_total;
use crate::storage::LocalCacheStore;

/// Cart, wishlist and category mutations over the persisted cache.
#[derive(Clone)]
pub struct CartService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    store: LocalCacheStore,
    bus: EventBus,
    api: Arc<dyn CartApi>,
}

impl CartService {
    /// Create the service.
    #[must_use]
    pub fn new(store: LocalCacheStore, bus: EventBus, api: Arc<dyn CartApi>) -> Self {
        Self {
            inner: Arc::new(ServiceInner { store, bus, api }),
        }
    }

    // -------------------------------------------------------------------------
    // Cart
    // -------------------------------------------------------------------------

    /// The cached cart line collection.
    #[must_use]
    pub fn cart_lines(&self) -> Vec<CartLine> {
        self.inner.store.cart_lines()
    }

    /// Add a line to the cart, returning the new total.
    ///
    /// At most one line exists per product: adding an already-present
    /// product accumulates quantity (capped) and refreshes the stored
    /// options and snapshot.
    pub fn add_to_cart(&self, line: CartLine) -> u32 {
        let mut lines = self.inner.store.cart_lines();
        match lines
            .iter_mut()
            .find(|existing| existing.product_id == line.product_id)
        {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .saturating_add(line.quantity)
                    .clamp(1, MAX_LINE_QUANTITY);
                existing.selected_options = line.selected_options;
                existing.options_pricing = line.options_pricing;
                existing.attachments = line.attachments;
                existing.snapshot = line.snapshot;
            }
            None => lines.push(line),
        }
        self.inner.store.set_cart_lines(&lines);

        let total = cart_total(&lines);
        self.inner.bus.dispatch(&SyncEvent::ProductAddedToCart);
        self.inner
            .bus
            .dispatch(&SyncEvent::CartCountChanged(Some(total)));
        total
    }

    /// Set a line's quantity, returning the new total.
    ///
    /// Returns `None` (and dispatches nothing) when the product is not in
    /// the cart. Quantities clamp to `1..=99`; use
    /// [`CartService::remove_from_cart`] to drop a line.
    pub fn set_quantity(&self, product: ProductId, quantity: u32) -> Option<u32> {
        let mut lines = self.inner.store.cart_lines();
        let line = lines
            .iter_mut()
            .find(|line| line.product_id == product)?;
        line.quantity = quantity.clamp(1, MAX_LINE_QUANTITY);
        self.inner.store.set_cart_lines(&lines);

        let total = cart_total(&lines);
        self.inner.bus.dispatch(&SyncEvent::CartUpdated);
        self.inner
            .bus
            .dispatch(&SyncEvent::CartCountChanged(Some(total)));
        Some(total)
    }

    /// Remove a line, returning whether it was present.
    pub fn remove_from_cart(&self, product: ProductId) -> bool {
        let mut lines = self.inner.store.cart_lines();
        let before = lines.len();
        lines.retain(|line| line.product_id != product);
        if lines.len() == before {
            return false;
        }
        self.inner.store.set_cart_lines(&lines);

        let total = cart_total(&lines);
        self.inner.bus.dispatch(&SyncEvent::CartUpdated);
        self.inner
            .bus
            .dispatch(&SyncEvent::CartCountChanged(Some(total)));
        true
    }

    /// Empty the cart collection.
    pub fn clear_cart(&self) {
        if self.inner.store.cart_lines().is_empty() {
            return;
        }
        self.inner.store.set_cart_lines(&[]);
        self.inner.bus.dispatch(&SyncEvent::CartUpdated);
        self.inner
            .bus
            .dispatch(&SyncEvent::CartCountChanged(Some(0)));
    }

    /// Nudge subscribers after an out-of-band server cart mutation.
    ///
    /// External components that write the server cart directly (product
    /// pages with option pickers) call this instead of touching the cache.
    pub fn force_cart_update(&self) {
        self.inner.bus.dispatch(&SyncEvent::ForceCartUpdate);
    }

    // -------------------------------------------------------------------------
    // Wishlist
    // -------------------------------------------------------------------------

    /// The wishlist product-id set.
    #[must_use]
    pub fn wishlist(&self) -> Vec<ProductId> {
        self.inner.store.wishlist()
    }

    /// Whether a product is on the wishlist.
    #[must_use]
    pub fn is_in_wishlist(&self, product: ProductId) -> bool {
        self.inner.store.wishlist().contains(&product)
    }

    /// Add a product to the wishlist set.
    ///
    /// Returns `false` (and dispatches nothing) when it was already there.
    pub fn add_to_wishlist(&self, product: ProductId) -> bool {
        let mut entries = self.inner.store.wishlist();
        if entries.contains(&product) {
            return false;
        }
        entries.push(product);
        self.inner.store.set_wishlist(&entries);

        self.inner.bus.dispatch(&SyncEvent::ProductAddedToWishlist);
        self.inner.bus.dispatch(&SyncEvent::WishlistUpdated);
        true
    }

    /// Remove a product from the wishlist set.
    pub fn remove_from_wishlist(&self, product: ProductId) -> bool {
        let mut entries = self.inner.store.wishlist();
        let before = entries.len();
        entries.retain(|entry| *entry != product);
        if entries.len() == before {
            return false;
        }
        self.inner.store.set_wishlist(&entries);

        self.inner
            .bus
            .dispatch(&SyncEvent::ProductRemovedFromWishlist);
        self.inner.bus.dispatch(&SyncEvent::WishlistUpdated);
        true
    }

    /// Empty the wishlist.
    pub fn clear_wishlist(&self) {
        if self.inner.store.wishlist().is_empty() {
            return;
        }
        self.inner.store.set_wishlist(&[]);
        self.inner.bus.dispatch(&SyncEvent::WishlistCleared);
        self.inner.bus.dispatch(&SyncEvent::WishlistUpdated);
    }

    // -------------------------------------------------------------------------
    // Categories
    // -------------------------------------------------------------------------

    /// The cached category list (TTL-less).
    #[must_use]
    pub fn cached_categories(&self) -> Vec<Category> {
        self.inner.store.categories()
    }

    /// Fetch the category list, refresh the cache and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns the `ApiError` on failure; the previously cached list stands
    /// and nothing is dispatched.
    #[instrument(skip(self))]
    pub async fn refresh_categories(&self) -> Result<Vec<Category>, ApiError> {
        let categories = match self.inner.api.fetch_categories().await {
            Ok(categories) => categories,
            Err(error) => {
                tracing::warn!(%error, "category refresh failed, keeping cached list");
                return Err(error);
            }
        };
        self.inner.store.set_categories(&categories);
        self.inner.bus.dispatch(&SyncEvent::CategoriesUpdated);
        Ok(categories)
    }
}
