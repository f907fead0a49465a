//! Durable key/value persistence with tolerant JSON decode.
//!
//! The persisted medium is shared by every tab ([`SharedStorage`]); each tab
//! attaches to it and gets its own [`LocalCacheStore`] handle with a
//! distinct [`TabId`]. Writes are synchronous within the writing tab; other
//! tabs only learn of a change by draining the notice channel, mirroring
//! how browser storage events behave.
//!
//! Reads that encounter a corrupted or non-JSON value return the type's
//! empty default and never raise: corruption is absorbed at this boundary,
//! not propagated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use uuid::Uuid;

use cartsync_core::ProductId;

use crate::keys;
use crate::models::{CartLine, Category, Identity};

/// Capacity of the cross-tab notice channel.
///
/// A lagged receiver is treated as "missed some changes, recompute
/// everything", so the buffer only needs to cover a normal burst.
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Identifies the tab a storage write originated from.
///
/// Lets a tab ignore notices for its own writes when pumping the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(Uuid);

impl TabId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change notice emitted after a write actually altered a stored value.
#[derive(Debug, Clone)]
pub struct StorageNotice {
    /// The persisted key that changed.
    pub key: String,
    /// The tab that performed the write.
    pub origin: TabId,
}

/// Raw persistence the cache is built on.
///
/// The embedding shell injects a durable implementation; tests and headless
/// use get [`MemoryBackend`]. Implementations report whether a write
/// actually changed the stored value so unchanged writes emit no notice.
pub trait StorageBackend: Send + Sync {
    /// Read the raw value for a key.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, returning `true` if the stored value changed.
    fn set(&self, key: &str, value: String) -> bool;

    /// Remove a key, returning `true` if it was present.
    fn remove(&self, key: &str) -> bool;
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match entries.insert(key.to_owned(), value.clone()) {
            Some(previous) => previous != value,
            None => true,
        }
    }

    fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key)
            .is_some()
    }
}

/// The persisted medium shared by every tab.
///
/// Cheaply cloneable; holds the backend and the notice channel.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<SharedStorageInner>,
}

struct SharedStorageInner {
    backend: Box<dyn StorageBackend>,
    notices: broadcast::Sender<StorageNotice>,
}

impl SharedStorage {
    /// Wrap a backend as the shared persisted medium.
    #[must_use]
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SharedStorageInner {
                backend: Box::new(backend),
                notices,
            }),
        }
    }

    /// Attach a new tab to the medium.
    #[must_use]
    pub fn attach(&self) -> LocalCacheStore {
        LocalCacheStore {
            shared: self.clone(),
            tab: TabId::generate(),
        }
    }

    /// Subscribe to change notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StorageNotice> {
        self.inner.notices.subscribe()
    }
}

/// A tab's handle on the persisted cache.
#[derive(Clone)]
pub struct LocalCacheStore {
    shared: SharedStorage,
    tab: TabId,
}

impl LocalCacheStore {
    /// The tab this handle writes as.
    #[must_use]
    pub const fn tab(&self) -> TabId {
        self.tab
    }

    /// Read and decode a JSON value.
    ///
    /// A missing, corrupted or differently-shaped value yields the type's
    /// default.
    #[must_use]
    pub fn get_json<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(raw) = self.shared.inner.backend.get(key) else {
            return T::default();
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(key, %error, "discarding unparsable cached value");
                T::default()
            }
        }
    }

    /// Encode and write a JSON value, notifying other tabs on change.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.write_raw(key, raw),
            Err(error) => {
                // Our own types always serialize; absorb rather than raise.
                tracing::error!(key, %error, "failed to encode cached value, skipping write");
            }
        }
    }

    /// Read an integer-string counter key.
    #[must_use]
    pub fn get_count(&self, key: &str) -> Option<u32> {
        self.shared
            .inner
            .backend
            .get(key)
            .and_then(|raw| raw.trim().parse().ok())
    }

    /// Write an integer-string counter key.
    pub fn set_count(&self, key: &str, value: u32) {
        self.write_raw(key, value.to_string());
    }

    /// Remove a key, notifying other tabs if it was present.
    pub fn remove(&self, key: &str) {
        if self.shared.inner.backend.remove(key) {
            self.notify(key);
        }
    }

    fn write_raw(&self, key: &str, raw: String) {
        if self.shared.inner.backend.set(key, raw) {
            self.notify(key);
        }
    }

    fn notify(&self, key: &str) {
        // Send fails only when no tab is listening; that's fine.
        let _ = self.shared.inner.notices.send(StorageNotice {
            key: key.to_owned(),
            origin: self.tab,
        });
    }

    // -------------------------------------------------------------------------
    // Typed views over the fixed key layout
    // -------------------------------------------------------------------------

    /// The stored identity, defaulting to guest.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.get_json(keys::USER)
    }

    /// The cached cart line collection.
    #[must_use]
    pub fn cart_lines(&self) -> Vec<CartLine> {
        self.get_json(keys::CART)
    }

    /// Overwrite the cached cart line collection.
    pub fn set_cart_lines(&self, lines: &[CartLine]) {
        self.set_json(keys::CART, &lines);
    }

    /// The wishlist product-id set (stored as an array).
    #[must_use]
    pub fn wishlist(&self) -> Vec<ProductId> {
        self.get_json(keys::WISHLIST)
    }

    /// Overwrite the wishlist product-id set.
    pub fn set_wishlist(&self, entries: &[ProductId]) {
        self.set_json(keys::WISHLIST, &entries);
    }

    /// The cached category list.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.get_json(keys::CACHED_CATEGORIES)
    }

    /// Overwrite the cached category list.
    pub fn set_categories(&self, categories: &[Category]) {
        self.set_json(keys::CACHED_CATEGORIES, &categories);
    }
}
