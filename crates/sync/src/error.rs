//! Unified error handling.
//!
//! Each module defines its own error enum; this umbrella exists for
//! embedders that funnel engine construction and login through one result
//! type. Faults inside the engine itself degrade instead of propagating
//! (see the storage and projector modules).

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::session::SessionError;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration loading or validation failed.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The storefront backend request failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// An identity transition was invalid.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Result type alias for `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
