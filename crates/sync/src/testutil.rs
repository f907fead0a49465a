//! Shared fixtures for the crate's unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use cartsync_core::{ProductId, UserId};

use crate::api::{ApiError, CartApi, CartSnapshot};
use crate::models::{CartLine, Category, ProductSnapshot};
use crate::storage::{LocalCacheStore, MemoryBackend, SharedStorage};

/// A cloneable scripted response.
#[derive(Debug, Clone)]
pub enum Scripted {
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

/// Scripted [`CartApi`] for exercising projector and reconciler flows.
#[derive(Default)]
pub struct ScriptedApi {
    cart_responses: Mutex<VecDeque<Scripted>>,
    failing_posts: Mutex<HashSet<ProductId>>,
    pub posted: Mutex<Vec<(UserId, ProductId, u32)>>,
    categories: Mutex<Vec<Category>>,
    /// When set, `fetch_cart` waits for a permit before responding.
    gate: Option<FetchGate>,
}

struct FetchGate {
    gate: Arc<Semaphore>,
    entered: Arc<Semaphore>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a cart response (served in order; the last one repeats).
    pub fn push_cart(self, snapshot: CartSnapshot) -> Self {
        self.cart_responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Scripted::Cart(snapshot));
        self
    }

    /// Queue a failing cart response.
    pub fn push_cart_failure(self, status: u16) -> Self {
        self.cart_responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(Scripted::Failure(status));
        self
    }

    /// Make posts for a product fail.
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
    /// fetch is blocked on `gate`, so tests can interleave deterministically.
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
impl CartApi for ScriptedApi {
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

impl crate::hooks::Notifier for RecordingNotifier {
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
    pub visits: std::sync::atomic::AtomicU32,
}

impl crate::hooks::Navigator for RecordingNavigator {
    fn to_default_view(&self) {
        self.visits
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// A fresh in-memory store handle.
pub fn store() -> LocalCacheStore {
    SharedStorage::new(MemoryBackend::default()).attach()
}

/// A plain cart line for a product.
pub fn line(product: i64, quantity: u32) -> CartLine {
    CartLine::new(
        ProductId::new(product),
        quantity,
        ProductSnapshot::default(),
    )
}
