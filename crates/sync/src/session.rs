//! Anonymous/authenticated transitions and cache-namespace isolation.
//!
//! Login persists the identity and, when the previous identity was a
//! guest, triggers the merge reconciler exactly once before repointing the
//! projector at the per-user namespace. Logout removes only the departing
//! user's counters - other users' cached counters on a shared device stay
//! untouched - and resets the displayed counts to zero immediately: one
//! identity's numbers never carry over into another's display.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::hooks::{Navigator, Notifier};
use crate::keys;
use crate::models::Identity;
use crate::projector::CountProjector;
use crate::reconcile::{MergeOutcome, MergeReconciler};
use crate::storage::LocalCacheStore;

/// Errors raised by identity transitions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Login requires an identity that carries a user id.
    #[error("login requires an authenticated identity")]
    MissingUserId,
}

/// Tracks the anonymous/authenticated state and owns namespace switching.
#[derive(Clone)]
pub struct SessionIdentity {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    store: LocalCacheStore,
    projector: CountProjector,
    reconciler: MergeReconciler,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
}

impl SessionIdentity {
    /// Create the session manager.
    #[must_use]
    pub fn new(
        store: LocalCacheStore,
        projector: CountProjector,
        reconciler: MergeReconciler,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                store,
                projector,
                reconciler,
                notifier,
                navigator,
            }),
        }
    }

    /// The currently stored identity (guest when absent or corrupted).
    #[must_use]
    pub fn current(&self) -> Identity {
        self.inner.store.identity()
    }

    /// Handle a successful login.
    ///
    /// When the previous identity was a guest, the merge reconciler runs
    /// (once) before the projector is repointed at the per-user namespace.
    /// A login while already authenticated re-persists the identity and
    /// refreshes, but does not re-merge: by then the guest cart has already
    /// been consumed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::MissingUserId` if the identity has no id.
    #[instrument(skip(self, identity), fields(user = ?identity.id))]
    pub async fn login(&self, identity: Identity) -> Result<Option<MergeOutcome>, SessionError> {
        let Some(user) = identity.id else {
            return Err(SessionError::MissingUserId);
        };

        let was_guest = self.inner.store.identity().is_guest();
        self.inner.store.set_json(keys::USER, &identity);

        let merge = if was_guest {
            Some(self.inner.reconciler.run(user).await)
        } else {
            tracing::debug!(%user, "login while already authenticated, skipping merge");
            None
        };

        // Repoint the displayed counts at the per-user namespace.
        self.inner.projector.mount();
        self.inner.projector.refresh_wishlist();

        self.inner
            .notifier
            .success(&format!("Welcome back, {}!", identity.display_name()));
        Ok(merge)
    }

    /// Handle a logout.
    ///
    /// Strict isolation: the departing user's per-user counters are removed,
    /// the local cart cache (which mirrors that user's server cart after a
    /// merge) is cleared, and the displayed counts drop to zero immediately.
    /// Counters cached for other users are left untouched.
    #[instrument(skip(self))]
    pub fn logout(&self) {
        let departing = self.inner.store.identity();
        self.inner.store.remove(keys::USER);

        if let Some(user) = departing.id {
            self.inner.store.remove(&keys::cart_count(user));
            self.inner.store.remove(&keys::wishlist_count(user));
            tracing::info!(%user, "session ended");
        }
        self.inner.store.remove(keys::CART);

        self.inner.reconciler.reset();
        self.inner.projector.reset();
        self.inner.navigator.to_default_view();
        self.inner.notifier.success("You have been signed out.");
    }
}
