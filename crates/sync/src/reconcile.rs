//! Folds a guest cart into the authenticated user's server cart.
//!
//! Runs once per login transition. Guest lines are posted sequentially in
//! stored order (parallel writes would race against a stateful server
//! cart); per-line failures are recorded and skipped. After every line has
//! been attempted the server cart is fetched once and overwrites the local
//! cache - server state always wins, and unmerged lines are not retried.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::instrument;

use cartsync_core::{ProductId, UserId};

use crate::api::CartApi;
use crate::events::{EventBus, SyncEvent};
use crate::hooks::Notifier;
use crate::keys;
use crate::storage::LocalCacheStore;

/// Merge state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// No merge has run this session.
    Idle,
    /// A merge is in flight.
    Merging,
    /// The local cache reflects the authoritative server cart.
    Reconciled,
    /// The final authoritative fetch failed; local state kept as-is.
    Failed,
}

/// What a merge run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Guest lines the run attempted to post.
    pub attempted: usize,
    /// Products whose line post failed (dropped, not retried).
    pub dropped: Vec<ProductId>,
    /// Cart total after the authoritative fetch, when it succeeded.
    pub server_total: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Outcome of [`MergeReconciler::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The local cache now mirrors the server cart.
    Reconciled(MergeReport),
    /// The final fetch failed; whatever was last written locally is kept.
    Failed(MergeReport),
    /// Another merge was already in flight (or finished); nothing ran.
    Skipped,
}

/// The once-per-login merge state machine.
#[derive(Clone)]
pub struct MergeReconciler {
    inner: Arc<ReconcilerInner>,
}

struct ReconcilerInner {
    store: LocalCacheStore,
    api: Arc<dyn CartApi>,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    state: Mutex<MergeState>,
}

impl MergeReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        store: LocalCacheStore,
        api: Arc<dyn CartApi>,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                store,
                api,
                bus,
                notifier,
                state: Mutex::new(MergeState::Idle),
            }),
        }
    }

    /// The current state of the machine.
    #[must_use]
    pub fn state(&self) -> MergeState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Return the machine to `Idle` for the next session (logout).
    pub fn reset(&self) {
        self.set_state(MergeState::Idle);
    }

    /// Run the merge for a freshly authenticated user.
    ///
    /// Re-entrancy guard: if the machine is not `Idle` the call is ignored,
    /// never run concurrently with an in-flight merge - a second run over
    /// the same guest snapshot would duplicate lines on the server.
    #[instrument(skip(self))]
    pub async fn run(&self, user: UserId) -> MergeOutcome {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state != MergeState::Idle {
                tracing::warn!(current = ?*state, "merge requested while not idle, ignoring");
                return MergeOutcome::Skipped;
            }
            *state = MergeState::Merging;
        }

        let started_at = Utc::now();
        let guest_lines = self.inner.store.cart_lines();

        if guest_lines.is_empty() {
            // Nothing to fold in; no network calls needed.
            self.set_state(MergeState::Reconciled);
            return MergeOutcome::Reconciled(MergeReport {
                attempted: 0,
                dropped: Vec::new(),
                server_total: None,
                started_at,
                finished_at: Utc::now(),
            });
        }

        let attempted = guest_lines.len();
        let mut dropped = Vec::new();
        for line in &guest_lines {
            // Sequential by design; a failed line is dropped, not fatal.
            if let Err(error) = self.inner.api.post_cart_line(user, line).await {
                tracing::warn!(product_id = %line.product_id, %error, "cart line merge failed");
                dropped.push(line.product_id);
            }
        }

        match self.inner.api.fetch_cart(user).await {
            Ok(snapshot) => {
                // Server state wins over whatever the guest had.
                match snapshot.local_lines() {
                    Some(lines) => self.inner.store.set_cart_lines(&lines),
                    None => self.inner.store.remove(keys::CART),
                }
                let total = snapshot.total_items;
                self.inner.store.set_count(&keys::cart_count(user), total);
                self.inner.store.set_count(keys::LAST_CART_COUNT, total);
                self.set_state(MergeState::Reconciled);
                self.inner.bus.dispatch(&SyncEvent::CartUpdated);
                self.inner
                    .notifier
                    .success("Your cart has been synced to your account.");
                tracing::info!(%user, total, dropped = dropped.len(), "guest cart reconciled");
                MergeOutcome::Reconciled(MergeReport {
                    attempted,
                    dropped,
                    server_total: Some(total),
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(error) => {
                tracing::warn!(%user, %error, "authoritative cart fetch failed after merge");
                self.set_state(MergeState::Failed);
                self.inner
                    .notifier
                    .warning("We couldn't sync your cart just now. Your items are saved on this device.");
                MergeOutcome::Failed(MergeReport {
                    attempted,
                    dropped,
                    server_total: None,
                    started_at,
                    finished_at: Utc::now(),
                })
            }
        }
    }

    fn set_state(&self, next: MergeState) {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CartSnapshot;
    use crate::hooks::NoopNotifier;
    use crate::testutil::{ScriptedApi, line, store};

    fn reconciler_with(
        api: ScriptedApi,
    ) -> (MergeReconciler, Arc<ScriptedApi>, LocalCacheStore, EventBus) {
        let api = Arc::new(api);
        let store = store();
        let bus = EventBus::new();
        let reconciler = MergeReconciler::new(
            store.clone(),
            Arc::clone(&api) as Arc<dyn CartApi>,
            bus.clone(),
            Arc::new(NoopNotifier),
        );
        (reconciler, api, store, bus)
    }

    #[tokio::test]
    async fn test_empty_guest_cart_reconciles_without_network() {
        let (reconciler, _api, _store, _bus) = reconciler_with(ScriptedApi::new());

        let outcome = reconciler.run(UserId::new(7)).await;

        match outcome {
            MergeOutcome::Reconciled(report) => {
                assert_eq!(report.attempted, 0);
                assert!(report.dropped.is_empty());
                assert_eq!(report.server_total, None);
            }
            other => panic!("expected Reconciled, got {other:?}"),
        }
        assert_eq!(reconciler.state(), MergeState::Reconciled);
    }

    #[tokio::test]
    async fn test_lines_post_sequentially_in_stored_order() {
        let scripted = ScriptedApi::new().push_cart(CartSnapshot::default());
        let (reconciler, api, store, _bus) = reconciler_with(scripted);
        store.set_cart_lines(&[line(3, 1), line(1, 2), line(2, 1)]);

        let user = UserId::new(7);
        reconciler.run(user).await;

        // Order must match the stored collection, not any sorted order.
        let posted = api
            .posted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(
            posted,
            vec![
                (user, ProductId::new(3), 1),
                (user, ProductId::new(1), 2),
                (user, ProductId::new(2), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_partial_failure_is_best_effort() {
        // postCartLine fails for product 2; the server already had it.
        let api = ScriptedApi::new()
            .fail_post(ProductId::new(2))
            .push_cart(CartSnapshot {
                total_items: 3,
                lines: None,
            });
        let (reconciler, _api, store, _bus) = reconciler_with(api);
        store.set_cart_lines(&[line(1, 2), line(2, 1)]);

        let outcome = reconciler.run(UserId::new(7)).await;

        match outcome {
            MergeOutcome::Reconciled(report) => {
                assert_eq!(report.attempted, 2);
                assert_eq!(report.dropped, vec![ProductId::new(2)]);
                assert_eq!(report.server_total, Some(3));
            }
            other => panic!("expected Reconciled, got {other:?}"),
        }
        assert_eq!(store.get_count(&keys::cart_count(UserId::new(7))), Some(3));
    }

    #[tokio::test]
    async fn test_failed_final_fetch_keeps_local_state() {
        let api = ScriptedApi::new().push_cart_failure(503);
        let (reconciler, _api, store, _bus) = reconciler_with(api);
        let lines = vec![line(1, 2)];
        store.set_cart_lines(&lines);

        let outcome = reconciler.run(UserId::new(7)).await;

        assert!(matches!(outcome, MergeOutcome::Failed(_)));
        assert_eq!(reconciler.state(), MergeState::Failed);
        // Whatever was last written locally stays as-is.
        assert_eq!(store.cart_lines(), lines);
    }

    #[tokio::test]
    async fn test_overwrite_with_server_truth_dispatches() {
        let api = ScriptedApi::new().push_cart(CartSnapshot {
            total_items: 4,
            lines: None,
        });
        let (reconciler, _api, store, bus) = reconciler_with(api);
        store.set_cart_lines(&[line(1, 2)]);

        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&dispatched);
        bus.subscribe(move |event| {
            seen.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());
        });

        reconciler.run(UserId::new(7)).await;

        // totalItems-only snapshot: local cart cleared, counters keep the total.
        assert!(store.cart_lines().is_empty());
        assert_eq!(store.get_count(keys::LAST_CART_COUNT), Some(4));
        assert_eq!(
            *dispatched
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            vec![SyncEvent::CartUpdated]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_skipped() {
        let api = ScriptedApi::new().push_cart(CartSnapshot::default());
        let (reconciler, _api, _store, _bus) = reconciler_with(api);

        assert!(matches!(
            reconciler.run(UserId::new(7)).await,
            MergeOutcome::Reconciled(_)
        ));
        assert_eq!(reconciler.run(UserId::new(7)).await, MergeOutcome::Skipped);

        reconciler.reset();
        assert_eq!(reconciler.state(), MergeState::Idle);
    }
}
