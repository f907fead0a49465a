//! REST client for the authoritative server cart.
//!
//! The backend's cart read endpoint has grown three response shapes over
//! time: a bare array of lines, an object with a `cart` array, and an
//! object exposing a numeric `totalItems`. [`normalize_cart`] folds all of
//! them into one canonical [`CartSnapshot`]; anything else normalizes to
//! the zero snapshot rather than erroring. Categories get the same
//! treatment for their bare-array / `{ data: [...] }` split.
//!
//! Transport and non-success responses are recoverable faults: the caller
//! decides the fallback, and this client never clears cached state.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

use cartsync_core::{ProductId, UserId};

use crate::config::SyncConfig;
use crate::models::{CartLine, Category, MAX_LINE_QUANTITY};

/// Errors that can occur when talking to the storefront backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Client construction failed.
    #[error("Invalid client configuration: {0}")]
    Configuration(String),
}

/// The canonical shape of the server cart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartSnapshot {
    /// Total items across all lines.
    pub total_items: u32,
    /// The line list, when the response shape carried one.
    pub lines: Option<Vec<RemoteCartLine>>,
}

impl CartSnapshot {
    /// Materialize local cart lines from the snapshot.
    ///
    /// Lines without a product id or with zero quantity count toward
    /// `total_items` but cannot become local lines, so they are dropped.
    #[must_use]
    pub fn local_lines(&self) -> Option<Vec<CartLine>> {
        self.lines.as_ref().map(|lines| {
            lines
                .iter()
                .filter_map(|line| line.clone().into_cart_line())
                .collect()
        })
    }
}

/// A cart line as the server reports it.
///
/// Server lines are sparser than local ones: some responses carry only a
/// quantity.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteCartLine {
    pub product_id: Option<ProductId>,
    pub quantity: Option<u32>,
    pub selected_options: Option<serde_json::Map<String, serde_json::Value>>,
    pub options_pricing: Option<serde_json::Map<String, serde_json::Value>>,
    pub attachments: Option<serde_json::Map<String, serde_json::Value>>,
    pub snapshot: Option<crate::models::ProductSnapshot>,
}

impl RemoteCartLine {
    /// The quantity this line contributes to the total.
    #[must_use]
    pub fn effective_quantity(&self) -> u32 {
        self.quantity.unwrap_or(0)
    }

    /// Convert into a local [`CartLine`], if the server sent enough.
    #[must_use]
    pub fn into_cart_line(self) -> Option<CartLine> {
        let product_id = self.product_id?;
        let quantity = self.quantity.filter(|quantity| *quantity > 0)?;
        let mut line = CartLine::new(
            product_id,
            quantity.min(MAX_LINE_QUANTITY),
            self.snapshot.unwrap_or_default(),
        );
        if let Some(options) = self.selected_options {
            line.selected_options = options.into_iter().collect();
        }
        if let Some(pricing) = self.options_pricing {
            line.options_pricing = pricing
                .into_iter()
                .filter_map(|(key, value)| {
                    serde_json::from_value(value).ok().map(|price| (key, price))
                })
                .collect();
        }
        if let Some(attachments) = self.attachments {
            line.attachments = attachments.into_iter().collect();
        }
        Some(line)
    }
}

/// The three documented cart response shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CartPayload {
    Lines(Vec<RemoteCartLine>),
    Wrapped { cart: Vec<RemoteCartLine> },
    Totaled {
        #[serde(rename = "totalItems")]
        total_items: u32,
    },
}

/// Normalize a cart response body into the canonical snapshot.
///
/// Any shape outside the documented three yields the zero snapshot.
#[must_use]
pub fn normalize_cart(payload: serde_json::Value) -> CartSnapshot {
    match serde_json::from_value::<CartPayload>(payload) {
        Ok(CartPayload::Lines(lines) | CartPayload::Wrapped { cart: lines }) => CartSnapshot {
            total_items: lines.iter().map(RemoteCartLine::effective_quantity).sum(),
            lines: Some(lines),
        },
        Ok(CartPayload::Totaled { total_items }) => CartSnapshot {
            total_items,
            lines: None,
        },
        Err(error) => {
            tracing::debug!(%error, "unrecognized cart response shape, normalizing to zero");
            CartSnapshot::default()
        }
    }
}

/// The two documented category response shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoriesPayload {
    Bare(Vec<Category>),
    Wrapped { data: Vec<Category> },
}

/// Normalize a categories response body into a category list.
#[must_use]
pub fn normalize_categories(payload: serde_json::Value) -> Vec<Category> {
    match serde_json::from_value::<CategoriesPayload>(payload) {
        Ok(CategoriesPayload::Bare(categories) | CategoriesPayload::Wrapped { data: categories }) => {
            categories
        }
        Err(error) => {
            tracing::debug!(%error, "unrecognized categories response shape, normalizing to empty");
            Vec::new()
        }
    }
}

/// Access to the authoritative server cart.
///
/// Behind a trait so the projector and reconciler can be exercised against
/// scripted backends in tests.
#[async_trait]
pub trait CartApi: Send + Sync {
    /// Fetch and normalize the user's server cart.
    async fn fetch_cart(&self, user: UserId) -> Result<CartSnapshot, ApiError>;

    /// Best-effort single-line write, used by the merge reconciler.
    async fn post_cart_line(&self, user: UserId, line: &CartLine) -> Result<(), ApiError>;

    /// Fetch and normalize the category list.
    async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError>;
}

/// reqwest-backed [`CartApi`] implementation.
#[derive(Clone)]
pub struct HttpCartApi {
    client: reqwest::Client,
    base: String,
}

impl HttpCartApi {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Configuration` if the token is not a valid header
    /// value, or `ApiError::Http` if the client fails to build.
    pub fn new(config: &SyncConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = format!("Bearer {}", token.expose_secret());
            let mut value = HeaderValue::from_str(&value)
                .map_err(|error| ApiError::Configuration(format!("invalid API token: {error}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base: config.api_base.as_str().trim_end_matches('/').to_owned(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ApiError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl CartApi for HttpCartApi {
    #[instrument(skip(self))]
    async fn fetch_cart(&self, user: UserId) -> Result<CartSnapshot, ApiError> {
        let url = self.endpoint(&format!("users/{user}/cart"));
        let payload = self.get_json(&url).await?;
        Ok(normalize_cart(payload))
    }

    #[instrument(skip(self, line), fields(product_id = %line.product_id))]
    async fn post_cart_line(&self, user: UserId, line: &CartLine) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("users/{user}/cart"));
        let response = self.client.post(&url).json(line).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        let url = self.endpoint("categories");
        let payload = self.get_json(&url).await?;
        Ok(normalize_categories(payload))
    }
}
