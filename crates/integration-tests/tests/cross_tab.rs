//! Multi-tab convergence through the shared storage medium.
//!
//! Tabs coordinate only through persisted writes and their change notices:
//! no locks, no transactions. A tab that missed a write converges once it
//! pumps its notices; its own writes never echo back.

use cartsync::models::Identity;
use cartsync::storage::{MemoryBackend, SharedStorage};
use cartsync_core::{ProductId, UserId};

use cartsync_integration_tests::{ScriptedCartApi, line, world_over};

#[test]
fn test_tab_converges_after_pump() {
    let shared = SharedStorage::new(MemoryBackend::default());
    let left = world_over(shared.clone(), ScriptedCartApi::new());
    let right = world_over(shared, ScriptedCartApi::new());

    left.engine.service().add_to_cart(line(1, 2));
    left.engine.service().add_to_wishlist(ProductId::new(5));

    // Cross-tab visibility is not synchronous.
    assert_eq!(right.engine.projector().counts().cart, 0);

    right.engine.pump_cross_tab();

    assert_eq!(right.engine.projector().counts().cart, 2);
    assert_eq!(right.engine.projector().counts().wishlist, 1);
}

#[test]
fn test_own_writes_are_not_foreign() {
    let shared = SharedStorage::new(MemoryBackend::default());
    let tab = world_over(shared, ScriptedCartApi::new());

    tab.engine.service().add_to_cart(line(1, 2));

    assert_eq!(tab.engine.pump_cross_tab(), 0);
}

#[test]
fn test_last_write_wins() {
    let shared = SharedStorage::new(MemoryBackend::default());
    let left = world_over(shared.clone(), ScriptedCartApi::new());
    let right = world_over(shared, ScriptedCartApi::new());

    left.engine.service().add_to_cart(line(1, 1));
    right.engine.pump_cross_tab();

    // Near-simultaneous conflicting writes: the later one sticks, the
    // earlier tab is corrected on its next pump.
    right.engine.service().set_quantity(ProductId::new(1), 5);
    left.engine.service().set_quantity(ProductId::new(1), 3);
    left.engine.pump_cross_tab();
    right.engine.pump_cross_tab();

    assert_eq!(left.engine.service().cart_lines(), right.engine.service().cart_lines());
    assert_eq!(left.engine.projector().counts().cart, 3);
    assert_eq!(right.engine.projector().counts().cart, 3);
}

#[tokio::test]
async fn test_cross_tab_identity_switch_repoints_counts() {
    let shared = SharedStorage::new(MemoryBackend::default());
    let active = world_over(
        shared.clone(),
        ScriptedCartApi::new().push_cart_payload(serde_json::json!({"totalItems": 4})),
    );
    let passive = world_over(shared, ScriptedCartApi::new());

    active.engine.service().add_to_cart(line(1, 4));
    passive.engine.pump_cross_tab();
    assert_eq!(passive.engine.projector().counts().cart, 4);

    // Login happens in the active tab; the passive tab pumps and repoints
    // at the per-user namespace.
    active
        .engine
        .session()
        .login(Identity::authenticated(UserId::new(7), "Sara"))
        .await
        .expect("login succeeds");
    passive.engine.pump_cross_tab();

    assert_eq!(passive.engine.projector().counts().cart, 4);
    assert!(!passive.engine.session().current().is_guest());

    // Logout in the active tab; the passive tab converges to guest zero.
    active.engine.session().logout();
    passive.engine.pump_cross_tab();

    assert!(passive.engine.session().current().is_guest());
    assert_eq!(passive.engine.projector().counts().cart, 0);
}

#[test]
fn test_unrelated_keys_do_not_trigger_recompute() {
    let shared = SharedStorage::new(MemoryBackend::default());
    let left = world_over(shared.clone(), ScriptedCartApi::new());
    let right = world_over(shared, ScriptedCartApi::new());

    left.engine.store().set_count("somethingElse", 3);

    // The notice is foreign and gets drained, but no family matched.
    assert_eq!(right.engine.pump_cross_tab(), 1);
    assert_eq!(right.engine.projector().counts().cart, 0);
}
