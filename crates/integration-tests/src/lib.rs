//! Shared fixtures for the Cartsync integration tests.
//!
//! Provides a scripted [`CartApi`] backend, recording notification and
//! navigation hooks, and helpers for assembling engines over a shared
//! in-memory storage medium.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use cartsync::api::{ApiError, CartApi, CartSnapshot};
use cartsync::hooks::{Navigator, Notifier};
use cartsync::models::{CartLine, Category, ProductSnapshot};
use cartsync::state::SyncEngine;
use cartsync::storage::{MemoryBackend, SharedStorage, StorageBackend};
use cartsync_core::{ProductId, UserId};

/// Initialize tracing once for the whole test binary.
///
/// Respects `RUST_LOG`; silent by default.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A plain cart line for a product.
#[must_use]
pub fn line(product: i64, quantity: u32) -> CartLine {
    CartLine::new(
        ProductId::new(product),
        quantity,
        ProductSnapshot::default(),
    )
}

/// A cloneable scripted response.
#[derive(Debug, Clone)]
enum Scripted {
    Cart(CartSnapshot),
    Failure(u16),
}

impl Scripted {
    fn into_result(self) -> Result<CartSnapshot, ApiError> {
        match self {
            Self::Cart(snapshot) => Ok(snapshot),
            Self::Failure(status) => Err(ApiError::Api {
                status,
                message: "scripted failure".to_owned(),
            }),
        }
    }
}

/// Scripted [`CartApi`] backend.
///
/// Cart responses are served in order, with the last one repeating; posts
/// can be failed per product; `fetch_cart` can be gated on a semaphore to
/// interleave with other work deterministically.
#[derive(Default)]
pub struct ScriptedCartApi {
    cart_responses: Mutex<VecDeque<Scripted>>,
    failing_posts: Mutex<HashSet<ProductId>>,
    /// Every successful post, in call order.
    pub posted: Mutex<Vec<(UserId, ProductId, u32)>>,
    categories: Mutex<Vec<Category>>,
    gate: Option<FetchGate>,
}

struct FetchGate {
    gate: Arc<Semaphore>,
    entered: Arc<Semaphore>,
}

impl ScriptedCartApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a cart response built from a raw JSON payload, exercising the
    /// same normalization the HTTP client applies.
    #[must_use]
    pub fn push_cart_payload(self, payload: serde_json::Value) -> Self {
        self.push_cart(cartsync::api::normalize_cart(payload))
    }

    /// Queue an already-normalized cart response.
    #[must_use]
    pub fn push_cart(self, snapshot: CartSnapshot) -> Self {
        self.cart_responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Scripted::Cart(snapshot));
        self
    }

    /// Queue a failing cart response.
    #[must_use]
    pub fn push_cart_failure(self, status: u16) -> Self {
        self.cart_responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Scripted::Failure(status));
        self
    }

    /// Make posts for a product fail.
    #[must_use]
    pub fn fail_post(self, product: ProductId) -> Self {
        self.failing_posts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(product);
        self
    }

    /// Gate `fetch_cart` on a semaphore the test releases.
    ///
    /// Returns `(api, gate, entered)`: `entered` gains a permit once a
    /// fetch is blocked on `gate`.
    #[must_use]
    pub fn gated(mut self) -> (Self, Arc<Semaphore>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let entered = Arc::new(Semaphore::new(0));
        self.gate = Some(FetchGate {
            gate: Arc::clone(&gate),
            entered: Arc::clone(&entered),
        });
        (self, gate, entered)
    }

    pub fn set_categories(&self, categories: Vec<Category>) {
        *self
            .categories
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = categories;
    }

    fn next_cart(&self) -> Result<CartSnapshot, ApiError> {
        let mut responses = self
            .cart_responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let scripted = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        scripted.map_or_else(|| Ok(CartSnapshot::default()), Scripted::into_result)
    }
}

#[async_trait]
impl CartApi for ScriptedCartApi {
    async fn fetch_cart(&self, _user: UserId) -> Result<CartSnapshot, ApiError> {
        if let Some(gate) = &self.gate {
            gate.entered.add_permits(1);
            gate.gate
                .acquire()
                .await
                .expect("gate never closed")
                .forget();
        }
        self.next_cart()
    }

    async fn post_cart_line(&self, user: UserId, line: &CartLine) -> Result<(), ApiError> {
        let failing = self
            .failing_posts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&line.product_id);
        if failing {
            return Err(ApiError::Api {
                status: 500,
                message: "scripted failure".to_owned(),
            });
        }
        self.posted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((user, line.product_id, line.quantity));
        Ok(())
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        Ok(self
            .categories
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }
}

/// Notifier that records every notice.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingNotifier {
    /// Snapshot of the recorded messages.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, String)> {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(("success", message.to_owned()));
    }

    fn warning(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(("warning", message.to_owned()));
    }
}

/// Navigator that counts default-view visits.
#[derive(Default)]
pub struct RecordingNavigator {
    pub visits: AtomicU32,
}

impl Navigator for RecordingNavigator {
    fn to_default_view(&self) {
        self.visits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// A fully wired single-tab world.
pub struct World {
    pub shared: SharedStorage,
    pub engine: SyncEngine,
    pub api: Arc<ScriptedCartApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub navigator: Arc<RecordingNavigator>,
}

/// Assemble an engine over a fresh in-memory medium.
#[must_use]
pub fn world(api: ScriptedCartApi) -> World {
    init_tracing();
    world_over(SharedStorage::new(MemoryBackend::default()), api)
}

/// Assemble an engine over a pre-seeded medium (e.g. corrupted values).
#[must_use]
pub fn world_over(shared: SharedStorage, api: ScriptedCartApi) -> World {
    init_tracing();
    let api = Arc::new(api);
    let notifier = Arc::new(RecordingNotifier::default());
    let navigator = Arc::new(RecordingNavigator::default());
    let engine = SyncEngine::new(
        &shared,
        Arc::clone(&api) as Arc<dyn CartApi>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        Arc::clone(&navigator) as Arc<dyn Navigator>,
    );
    World {
        shared,
        engine,
        api,
        notifier,
        navigator,
    }
}

/// A backend pre-seeded with raw values before the engine attaches.
#[must_use]
pub fn seeded_backend(entries: &[(&str, &str)]) -> MemoryBackend {
    let backend = MemoryBackend::default();
    for (key, value) in entries {
        backend.set(key, (*value).to_owned());
    }
    backend
}
