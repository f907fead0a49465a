//! Cartsync - client-side cart/wishlist state synchronization engine.
//!
//! This crate keeps a storefront UI's cart and wishlist counts consistent
//! across components and browser tabs, and folds a guest's pre-login cart
//! into the authoritative server-side cart at the moment of login.
//!
//! # Architecture
//!
//! - [`storage`] - durable key/value persistence with tolerant JSON decode,
//!   shared across tabs through a notice channel
//! - [`events`] - the fixed catalog of mutation signals and the synchronous
//!   in-tab event bus
//! - [`projector`] - derives the two numbers the UI renders (cart count,
//!   wishlist count) with optimistic-then-refreshed semantics
//! - [`api`] - normalizes the server cart's variant response shapes and
//!   performs best-effort writes
//! - [`reconcile`] - the once-per-login state machine merging a guest cart
//!   into the user's server cart
//! - [`session`] - anonymous/authenticated transitions and cache-namespace
//!   isolation
//! - [`service`] - the consolidated mutation surface UI components call
//! - [`state`] - the per-tab [`state::SyncEngine`] assembling all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use cartsync::state::SyncEngine;
//! use cartsync::storage::{MemoryBackend, SharedStorage};
//!
//! let shared = SharedStorage::new(MemoryBackend::default());
//! let engine = SyncEngine::headless(&shared, api);
//!
//! engine.service().add_to_cart(line);
//! assert_eq!(engine.projector().counts().cart, 1);
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod keys;
pub mod models;
pub mod projector;
pub mod reconcile;
pub mod session;
pub mod service;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod testutil;
