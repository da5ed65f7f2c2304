//! Error types for the datastore

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the datastore
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Key failed validation (wrong type, wrong shape, mixed set, empty request)
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    /// Add target already exists
    #[error("Duplicate key: {key}")]
    DuplicateKey { key: String },

    /// Target path does not exist
    #[error("Key path not found: {path}")]
    NotFound { path: String },

    /// Malformed ctrl map
    #[error("Invalid ctrl: {0}")]
    InvalidControl(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Cache backend could not serve a request (never fatal to the engine)
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl Error {
    /// Shorthand for an [`Error::InvalidKey`]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Error::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`Error::Storage`]
    pub fn storage(reason: impl std::fmt::Display) -> Self {
        Error::Storage(reason.to_string())
    }

    /// True when the caller's input caused the failure; retrying the same
    /// call cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey { .. } | Error::DuplicateKey { .. } | Error::InvalidControl(_)
        )
    }
}
