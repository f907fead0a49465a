//! The in-tab event bus and its fixed signal catalog.
//!
//! Any successful mutation of a persisted cart/wishlist/category collection
//! must dispatch the matching signal before the mutating call returns, so
//! every mounted subscriber can recompute without polling. Handlers
//! recompute from the persisted collection itself, never from an event
//! payload; `cartCountChanged` may carry a precomputed total purely as a
//! latency optimization.

use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

/// A signal in the fixed catalog.
///
/// The wire names (see [`SyncEvent::name`]) are part of the contract:
/// renaming any of them breaks cross-component coupling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    CartUpdated,
    ProductAddedToCart,
    ForceCartUpdate,
    /// Optionally carries the new total as a latency optimization; handlers
    /// must stay correct if they ignore it and re-derive.
    CartCountChanged(Option<u32>),
    WishlistUpdated,
    ProductAddedToWishlist,
    ProductRemovedFromWishlist,
    WishlistCleared,
    CategoriesUpdated,
}

impl SyncEvent {
    /// The exact signal name the storefront dispatches.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CartUpdated => "cartUpdated",
            Self::ProductAddedToCart => "productAddedToCart",
            Self::ForceCartUpdate => "forceCartUpdate",
            Self::CartCountChanged(_) => "cartCountChanged",
            Self::WishlistUpdated => "wishlistUpdated",
            Self::ProductAddedToWishlist => "productAddedToWishlist",
            Self::ProductRemovedFromWishlist => "productRemovedFromWishlist",
            Self::WishlistCleared => "wishlistCleared",
            Self::CategoriesUpdated => "categoriesUpdated",
        }
    }

    /// Look a signal up by its wire name (payload-less).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cartUpdated" => Some(Self::CartUpdated),
            "productAddedToCart" => Some(Self::ProductAddedToCart),
            "forceCartUpdate" => Some(Self::ForceCartUpdate),
            "cartCountChanged" => Some(Self::CartCountChanged(None)),
            "wishlistUpdated" => Some(Self::WishlistUpdated),
            "productAddedToWishlist" => Some(Self::ProductAddedToWishlist),
            "productRemovedFromWishlist" => Some(Self::ProductRemovedFromWishlist),
            "wishlistCleared" => Some(Self::WishlistCleared),
            "categoriesUpdated" => Some(Self::CategoriesUpdated),
            _ => None,
        }
    }

    /// Every signal in the catalog, payload-less.
    #[must_use]
    pub fn catalog() -> [Self; 9] {
        [
            Self::CartUpdated,
            Self::ProductAddedToCart,
            Self::ForceCartUpdate,
            Self::CartCountChanged(None),
            Self::WishlistUpdated,
            Self::ProductAddedToWishlist,
            Self::ProductRemovedFromWishlist,
            Self::WishlistCleared,
            Self::CategoriesUpdated,
        ]
    }
}

/// Handle returned by [`EventBus::subscribe`], used to detach on unmount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Synchronous in-tab publish/subscribe.
///
/// Dispatch invokes every subscriber before returning, in subscription
/// order. Cheaply cloneable; all clones share the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<(SubscriberId, Handler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every dispatched signal.
    pub fn subscribe(&self, handler: impl Fn(&SyncEvent) + Send + Sync + 'static) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Detach a previously registered handler.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Invoke every subscriber with the signal, synchronously.
    pub fn dispatch(&self, event: &SyncEvent) {
        tracing::trace!(signal = event.name(), "dispatching");
        // Handlers run outside the lock so they may subscribe or dispatch.
        let handlers: Vec<Handler> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}
