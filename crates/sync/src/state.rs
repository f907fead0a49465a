//! Per-tab engine assembly.
//!
//! [`SyncEngine`] wires the store, bus, projector, reconciler, session and
//! service together for one tab, with the projector subscribed to the bus
//! at construction. It also owns the tab's end of the cross-tab notice
//! channel: call [`SyncEngine::pump_cross_tab`] from the shell's idle hook
//! to fold other tabs' writes into this tab's counts.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::api::{CartApi, HttpCartApi};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::hooks::{Navigator, NoopNavigator, NoopNotifier, Notifier};
use crate::keys::{self, KeyFamily};
use crate::projector::CountProjector;
use crate::reconcile::MergeReconciler;
use crate::service::CartService;
use crate::session::SessionIdentity;
use crate::storage::{LocalCacheStore, SharedStorage, StorageNotice};

/// One tab's synchronization engine.
///
/// Cheaply cloneable via `Arc`; every clone shares the same wiring.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: LocalCacheStore,
    bus: EventBus,
    projector: CountProjector,
    reconciler: MergeReconciler,
    session: SessionIdentity,
    service: CartService,
    notices: Mutex<broadcast::Receiver<StorageNotice>>,
}

impl SyncEngine {
    /// Assemble an engine for one tab.
    ///
    /// Subscribes the projector to the bus and performs the initial
    /// optimistic mount.
    #[must_use]
    pub fn new(
        shared: &SharedStorage,
        api: Arc<dyn CartApi>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let notices = Mutex::new(shared.subscribe());
        let store = shared.attach();
        let bus = EventBus::new();
        let projector = CountProjector::new(store.clone(), Arc::clone(&api));
        let reconciler = MergeReconciler::new(
            store.clone(),
            Arc::clone(&api),
            bus.clone(),
            Arc::clone(&notifier),
        );
        let session = SessionIdentity::new(
            store.clone(),
            projector.clone(),
            reconciler.clone(),
            notifier,
            navigator,
        );
        let service = CartService::new(store.clone(), bus.clone(), api);

        {
            let projector = projector.clone();
            bus.subscribe(move |event| projector.apply_event(event));
        }
        projector.mount();

        Self {
            inner: Arc::new(EngineInner {
                store,
                bus,
                projector,
                reconciler,
                session,
                service,
                notices,
            }),
        }
    }

    /// Assemble an engine with no-op notification and navigation hooks.
    #[must_use]
    pub fn headless(shared: &SharedStorage, api: Arc<dyn CartApi>) -> Self {
        Self::new(
            shared,
            api,
            Arc::new(NoopNotifier),
            Arc::new(NoopNavigator),
        )
    }

    /// Assemble an engine backed by the HTTP client the config describes.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built from the
    /// configuration.
    pub fn from_config(
        shared: &SharedStorage,
        config: &SyncConfig,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let api = Arc::new(HttpCartApi::new(config)?);
        Ok(Self::new(shared, api, notifier, navigator))
    }

    /// This tab's cache handle.
    #[must_use]
    pub fn store(&self) -> &LocalCacheStore {
        &self.inner.store
    }

    /// This tab's event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The count projector.
    #[must_use]
    pub fn projector(&self) -> &CountProjector {
        &self.inner.projector
    }

    /// The merge reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &MergeReconciler {
        &self.inner.reconciler
    }

    /// The session manager.
    #[must_use]
    pub fn session(&self) -> &SessionIdentity {
        &self.inner.session
    }

    /// The mutation service.
    #[must_use]
    pub fn service(&self) -> &CartService {
        &self.inner.service
    }

    /// Drain pending cross-tab notices and recompute what they touched.
    ///
    /// Writes originating from this tab are skipped; the in-tab dispatch
    /// already covered them. Returns the number of foreign notices handled.
    pub fn pump_cross_tab(&self) -> usize {
        let mut handled = 0;
        let mut cart = false;
        let mut wishlist = false;
        let mut categories = false;
        let mut identity = false;

        {
            let mut notices = self
                .inner
                .notices
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            loop {
                match notices.try_recv() {
                    Ok(notice) => {
                        if notice.origin == self.inner.store.tab() {
                            continue;
                        }
                        handled += 1;
                        match keys::family(&notice.key) {
                            KeyFamily::Cart => cart = true,
                            KeyFamily::Wishlist => wishlist = true,
                            KeyFamily::Categories => categories = true,
                            KeyFamily::Identity => identity = true,
                            KeyFamily::Other => {}
                        }
                    }
                    Err(TryRecvError::Lagged(missed)) => {
                        // Too far behind to know what changed; recompute all.
                        tracing::debug!(missed, "storage notices lagged, recomputing everything");
                        cart = true;
                        wishlist = true;
                        categories = true;
                        identity = true;
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }

        if identity {
            // Another tab switched identity; re-derive both counters from
            // the new namespace.
            self.inner.projector.mount();
        }
        if cart {
            self.inner.bus.dispatch(&SyncEvent::ForceCartUpdate);
        }
        if wishlist {
            self.inner.bus.dispatch(&SyncEvent::WishlistUpdated);
        }
        if categories {
            self.inner.bus.dispatch(&SyncEvent::CategoriesUpdated);
        }
        handled
    }
}
