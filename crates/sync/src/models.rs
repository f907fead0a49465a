//! Domain types for the synchronization engine.
//!
//! These mirror the camelCase JSON the storefront persists and the REST
//! backend serves, so the same types round-trip through both the cache and
//! the wire.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cartsync_core::{CategoryId, ProductId, UserId};

/// Per-line quantity cap enforced by the storefront's quantity stepper.
pub const MAX_LINE_QUANTITY: u32 = 99;

/// A single cart line.
///
/// Uniqueness: at most one line per product in a given cart collection;
/// adding the same product again accumulates quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Product this line refers to.
    pub product_id: ProductId,
    /// Quantity, always within `1..=MAX_LINE_QUANTITY`.
    pub quantity: u32,
    /// Selected product options (option name -> chosen value).
    #[serde(default)]
    pub selected_options: BTreeMap<String, serde_json::Value>,
    /// Price adjustments per selected option.
    #[serde(default)]
    pub options_pricing: BTreeMap<String, Decimal>,
    /// Uploaded attachments keyed by attachment slot.
    #[serde(default)]
    pub attachments: BTreeMap<String, serde_json::Value>,
    /// Display snapshot taken when the line was created.
    #[serde(default)]
    pub snapshot: ProductSnapshot,
}

impl CartLine {
    /// Create a plain line with no options, pricing or attachments.
    #[must_use]
    pub fn new(product_id: ProductId, quantity: u32, snapshot: ProductSnapshot) -> Self {
        Self {
            product_id,
            quantity: quantity.clamp(1, MAX_LINE_QUANTITY),
            selected_options: BTreeMap::new(),
            options_pricing: BTreeMap::new(),
            attachments: BTreeMap::new(),
            snapshot,
        }
    }
}

/// Display data captured when a product enters the cart.
///
/// Lets the UI render the line without re-fetching the product.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub image: String,
}

impl ProductSnapshot {
    /// Create a snapshot from its display fields.
    #[must_use]
    pub fn new(name: impl Into<String>, price: Decimal, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price,
            image: image.into(),
        }
    }
}

/// The persisted identity blob.
///
/// An absent `id` means the session is a guest; a present `id` means it is
/// authenticated as that user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl Identity {
    /// A guest identity (no user id).
    #[must_use]
    pub fn guest() -> Self {
        Self::default()
    }

    /// An authenticated identity for a user.
    #[must_use]
    pub fn authenticated(id: UserId, first_name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            first_name: first_name.into(),
            name: String::new(),
            email: String::new(),
        }
    }

    /// Whether this identity is a guest.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        self.id.is_none()
    }

    /// The cache namespace this identity's counters live under.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        match self.id {
            Some(user) => Namespace::User(user),
            None => Namespace::Guest,
        }
    }

    /// The name to greet the user with.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.first_name.is_empty() {
            &self.name
        } else {
            &self.first_name
        }
    }
}

/// Partition of persisted counter keys by identity.
///
/// Values under one namespace must never be read or written as if they
/// belonged to another; switching identity switches namespace atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Guest,
    User(UserId),
}

/// A product category, cached under `cachedCategories`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_line_clamps_quantity() {
        let line = CartLine::new(ProductId::new(1), 0, ProductSnapshot::default());
        assert_eq!(line.quantity, 1);

        let line = CartLine::new(ProductId::new(1), 500, ProductSnapshot::default());
        assert_eq!(line.quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_cart_line_serializes_camel_case() {
        let line = CartLine::new(
            ProductId::new(3),
            2,
            ProductSnapshot::new("Mug", Decimal::new(1450, 2), "mug.png"),
        );
        let json = serde_json::to_value(&line).expect("serialize");
        assert_eq!(json["productId"], 3);
        assert_eq!(json["quantity"], 2);
        assert_eq!(json["snapshot"]["name"], "Mug");
    }

    #[test]
    fn test_cart_line_tolerates_missing_maps() {
        // Older persisted lines carried only productId and quantity.
        let line: CartLine =
            serde_json::from_str(r#"{"productId": 5, "quantity": 2}"#).expect("sparse line");
        assert_eq!(line.product_id, ProductId::new(5));
        assert!(line.selected_options.is_empty());
        assert_eq!(line.snapshot, ProductSnapshot::default());
    }

    #[test]
    fn test_identity_namespace() {
        assert!(Identity::guest().is_guest());
        assert_eq!(Identity::guest().namespace(), Namespace::Guest);

        let user = Identity::authenticated(UserId::new(7), "Sara");
        assert!(!user.is_guest());
        assert_eq!(user.namespace(), Namespace::User(UserId::new(7)));
        assert_eq!(user.display_name(), "Sara");
    }

    #[test]
    fn test_identity_blob_round_trip() {
        let blob = r#"{"id": 7, "firstName": "Sara", "name": "Sara K", "email": "s@example.com"}"#;
        let identity: Identity = serde_json::from_str(blob).expect("identity blob");
        assert_eq!(identity.id, Some(UserId::new(7)));
        assert_eq!(identity.first_name, "Sara");
    }
}
