//! Derives the two numbers the UI actually renders.
//!
//! On every relevant signal the projector recomputes from the persisted
//! collections. Guests derive both counts locally. Authenticated sessions
//! display the last-persisted per-user counter immediately (no flash of
//! zero while the network is pending) and replace it once
//! [`CountProjector::refresh_cart`] resolves against the server.

use std::sync::{Arc, Mutex};

use tracing::instrument;

use crate::api::{ApiError, CartApi};
use crate::events::SyncEvent;
use crate::keys;
use crate::models::CartLine;
use crate::storage::LocalCacheStore;

/// The displayed counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub cart: u32,
    pub wishlist: u32,
}

/// Outcome of an authenticated cart refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartRefresh {
    /// Server total applied and persisted.
    Applied(u32),
    /// The identity changed while the fetch was in flight; the response was
    /// discarded.
    DiscardedStale,
    /// Guest session; the count was derived locally, no network involved.
    Local(u32),
}

/// Projects cart/wishlist counts from cache + identity.
#[derive(Clone)]
pub struct CountProjector {
    inner: Arc<ProjectorInner>,
}

struct ProjectorInner {
    store: LocalCacheStore,
    api: Arc<dyn CartApi>,
    counts: Mutex<Counts>,
}

impl CountProjector {
    /// Create a projector over a store and server client.
    #[must_use]
    pub fn new(store: LocalCacheStore, api: Arc<dyn CartApi>) -> Self {
        Self {
            inner: Arc::new(ProjectorInner {
                store,
                api,
                counts: Mutex::new(Counts::default()),
            }),
        }
    }

    /// The currently displayed counts.
    #[must_use]
    pub fn counts(&self) -> Counts {
        *self
            .inner
            .counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Initial optimistic compute, before any network round trip.
    pub fn mount(&self) {
        let identity = self.inner.store.identity();
        match identity.id {
            None => {
                self.recompute_cart_local();
                self.refresh_wishlist();
            }
            Some(user) => {
                // Last-persisted per-user counters, falling back to the
                // global fallback keys, then zero.
                let cart = self
                    .inner
                    .store
                    .get_count(&keys::cart_count(user))
                    .or_else(|| self.inner.store.get_count(keys::LAST_CART_COUNT))
                    .unwrap_or(0);
                let wishlist = self
                    .inner
                    .store
                    .get_count(&keys::wishlist_count(user))
                    .or_else(|| self.inner.store.get_count(keys::LAST_WISHLIST_COUNT))
                    .unwrap_or(0);
                self.set_counts(|counts| {
                    counts.cart = cart;
                    counts.wishlist = wishlist;
                });
            }
        }
    }

    /// Synchronous recompute on a dispatched signal.
    ///
    /// Wired to the bus once at engine construction. The payload of
    /// `cartCountChanged` is only a latency optimization; every path here
    /// stays correct without it.
    pub fn apply_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::CartUpdated | SyncEvent::ProductAddedToCart | SyncEvent::ForceCartUpdate => {
                self.recompute_cart_local();
            }
            SyncEvent::CartCountChanged(total) => {
                let identity = self.inner.store.identity();
                if identity.is_guest() {
                    // Source of truth is the local collection; re-derive.
                    self.recompute_cart_local();
                } else if let Some(total) = *total {
                    self.set_counts(|counts| counts.cart = total);
                } else {
                    self.recompute_cart_local();
                }
            }
            SyncEvent::WishlistUpdated
            | SyncEvent::ProductAddedToWishlist
            | SyncEvent::ProductRemovedFromWishlist
            | SyncEvent::WishlistCleared => {
                self.refresh_wishlist();
            }
            SyncEvent::CategoriesUpdated => {}
        }
    }

    /// Refresh the cart count against the server when authenticated.
    ///
    /// A response that resolves after the identity has changed is discarded.
    /// A transport failure leaves the last-known-good value on screen.
    ///
    /// # Errors
    ///
    /// Returns the underlying `ApiError` on a failed refresh; the displayed
    /// count is untouched.
    #[instrument(skip(self))]
    pub async fn refresh_cart(&self) -> Result<CartRefresh, ApiError> {
        let issued = self.inner.store.identity();
        let Some(user) = issued.id else {
            return Ok(CartRefresh::Local(self.recompute_cart_local()));
        };

        let snapshot = match self.inner.api.fetch_cart(user).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(%user, %error, "cart refresh failed, keeping cached count");
                return Err(error);
            }
        };

        // Guard against responses outliving the identity they were issued
        // for (logout, or switch to a different user).
        let current = self.inner.store.identity();
        if current.id != issued.id {
            tracing::debug!(%user, "discarding cart refresh for a stale identity");
            return Ok(CartRefresh::DiscardedStale);
        }

        let total = snapshot.total_items;
        self.set_counts(|counts| counts.cart = total);
        self.inner.store.set_count(&keys::cart_count(user), total);
        self.inner.store.set_count(keys::LAST_CART_COUNT, total);
        Ok(CartRefresh::Applied(total))
    }

    /// Zero both displayed counters (logout isolation).
    pub fn reset(&self) {
        self.set_counts(|counts| *counts = Counts::default());
    }

    /// Re-derive the cart count from the persisted collection.
    ///
    /// Guests persist the result to the global fallback; authenticated
    /// sessions keep their optimistic per-user counter until a server
    /// refresh replaces it.
    fn recompute_cart_local(&self) -> u32 {
        let identity = self.inner.store.identity();
        match identity.id {
            None => {
                let total = cart_total(&self.inner.store.cart_lines());
                self.set_counts(|counts| counts.cart = total);
                self.inner.store.set_count(keys::LAST_CART_COUNT, total);
                total
            }
            Some(user) => {
                let total = self
                    .inner
                    .store
                    .get_count(&keys::cart_count(user))
                    .unwrap_or_else(|| self.counts().cart);
                self.set_counts(|counts| counts.cart = total);
                total
            }
        }
    }

    /// Re-derive the wishlist count from the device-local set.
    ///
    /// Persists the global fallback and, when authenticated, the per-user
    /// counter.
    pub fn refresh_wishlist(&self) -> u32 {
        let count = u32::try_from(self.inner.store.wishlist().len()).unwrap_or(u32::MAX);
        self.set_counts(|counts| counts.wishlist = count);
        self.inner.store.set_count(keys::LAST_WISHLIST_COUNT, count);
        if let Some(user) = self.inner.store.identity().id {
            self.inner
                .store
                .set_count(&keys::wishlist_count(user), count);
        }
        count
    }

    fn set_counts(&self, update: impl FnOnce(&mut Counts)) {
        let mut counts = self
            .inner
            .counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        update(&mut counts);
    }
}

/// Sum of quantities across cart lines.
#[must_use]
pub fn cart_total(lines: &[CartLine]) -> u32 {
    lines.iter().map(|line| line.quantity).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CartSnapshot;
    use crate::models::Identity;
    use crate::testutil::{ScriptedApi, line, store};
    use cartsync_core::{ProductId, UserId};

    fn projector_with(api: ScriptedApi) -> (CountProjector, LocalCacheStore) {
        let store = store();
        let projector = CountProjector::new(store.clone(), Arc::new(api));
        (projector, store)
    }

    #[test]
    fn test_guest_counts_derive_from_collections() {
        let (projector, store) = projector_with(ScriptedApi::new());
        store.set_cart_lines(&[line(1, 2), line(2, 3)]);
        store.set_wishlist(&[ProductId::new(9), ProductId::new(10)]);

        projector.mount();

        assert_eq!(projector.counts(), Counts { cart: 5, wishlist: 2 });
        assert_eq!(store.get_count(keys::LAST_CART_COUNT), Some(5));
    }

    #[test]
    fn test_corrupted_cart_reads_as_zero() {
        let (projector, store) = projector_with(ScriptedApi::new());
        store.set_json(keys::CART, &"{not json");
        // The raw value is a JSON string, not an array; same tolerant path.
        projector.mount();
        assert_eq!(projector.counts().cart, 0);
    }

    #[test]
    fn test_authenticated_mount_uses_cached_counter() {
        let (projector, store) = projector_with(ScriptedApi::new());
        let user = UserId::new(7);
        store.set_json(keys::USER, &Identity::authenticated(user, "Sara"));
        store.set_count(&keys::cart_count(user), 4);
        store.set_count(&keys::wishlist_count(user), 2);

        projector.mount();

        assert_eq!(projector.counts(), Counts { cart: 4, wishlist: 2 });
    }

    #[test]
    fn test_authenticated_mount_defaults_to_zero() {
        let (projector, store) = projector_with(ScriptedApi::new());
        store.set_json(keys::USER, &Identity::authenticated(UserId::new(7), "Sara"));

        projector.mount();

        assert_eq!(projector.counts(), Counts::default());
    }

    #[test]
    fn test_repeated_dispatch_is_idempotent() {
        let (projector, store) = projector_with(ScriptedApi::new());
        store.set_cart_lines(&[line(1, 2)]);

        projector.apply_event(&SyncEvent::CartUpdated);
        let first = projector.counts();
        projector.apply_event(&SyncEvent::CartUpdated);

        assert_eq!(projector.counts(), first);
        assert_eq!(first.cart, 2);
    }

    #[test]
    fn test_count_changed_payload_is_optional() {
        let (projector, store) = projector_with(ScriptedApi::new());
        store.set_cart_lines(&[line(1, 3)]);

        // A guest handler must re-derive even when a payload is present.
        projector.apply_event(&SyncEvent::CartCountChanged(Some(99)));
        assert_eq!(projector.counts().cart, 3);

        projector.apply_event(&SyncEvent::CartCountChanged(None));
        assert_eq!(projector.counts().cart, 3);
    }

    #[tokio::test]
    async fn test_refresh_applies_server_total() {
        let api = ScriptedApi::new().push_cart(CartSnapshot {
            total_items: 6,
            lines: None,
        });
        let (projector, store) = projector_with(api);
        let user = UserId::new(7);
        store.set_json(keys::USER, &Identity::authenticated(user, "Sara"));

        let outcome = projector.refresh_cart().await.expect("refresh succeeds");

        assert_eq!(outcome, CartRefresh::Applied(6));
        assert_eq!(projector.counts().cart, 6);
        assert_eq!(store.get_count(&keys::cart_count(user)), Some(6));
        assert_eq!(store.get_count(keys::LAST_CART_COUNT), Some(6));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_good() {
        let api = ScriptedApi::new().push_cart_failure(503);
        let (projector, store) = projector_with(api);
        let user = UserId::new(7);
        store.set_json(keys::USER, &Identity::authenticated(user, "Sara"));
        store.set_count(&keys::cart_count(user), 4);
        projector.mount();

        let result = projector.refresh_cart().await;

        assert!(result.is_err());
        assert_eq!(projector.counts().cart, 4);
    }

    #[tokio::test]
    async fn test_stale_refresh_is_discarded() {
        let (api, gate, entered) = ScriptedApi::new()
            .push_cart(CartSnapshot {
                total_items: 9,
                lines: None,
            })
            .gated();
        let (projector, store) = projector_with(api);
        store.set_json(keys::USER, &Identity::authenticated(UserId::new(7), "Sara"));

        let in_flight = {
            let projector = projector.clone();
            tokio::spawn(async move { projector.refresh_cart().await })
        };

        // Log out while the fetch is pending, then let it resolve.
        entered.acquire().await.expect("fetch started").forget();
        store.remove(keys::USER);
        projector.reset();
        gate.add_permits(1);

        let outcome = in_flight
            .await
            .expect("task completes")
            .expect("refresh completes");
        assert_eq!(outcome, CartRefresh::DiscardedStale);
        assert_eq!(projector.counts().cart, 0);
    }

    #[test]
    fn test_wishlist_is_a_set_projection() {
        let (projector, store) = projector_with(ScriptedApi::new());
        store.set_wishlist(&[ProductId::new(1), ProductId::new(2)]);

        projector.apply_event(&SyncEvent::ProductAddedToWishlist);

        assert_eq!(projector.counts().wishlist, 2);
        assert_eq!(store.get_count(keys::LAST_WISHLIST_COUNT), Some(2));
    }
}
