//! Core error types for channelhub-core.
//!
//! Client-facing lifecycle errors (`InvalidState`, `NotFound`,
//! `QuotaExceeded`) live directly on [`CoreError`]; collaborator failures are
//! grouped into one enum per concern and converted with `#[from]`.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for channelhub-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Operation attempted on an integration in the wrong lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Referenced integration, plug, provider or organization does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Channel limit for the organization is reached.
    #[error("You have reached the maximum number of channels ({limit})")]
    QuotaExceeded { limit: usize },

    /// Errors raised by a social provider capability.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Repository errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Job queue errors.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the error should be reported to the caller as a client error
    /// rather than an internal failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidState(_) | CoreError::NotFound { .. } | CoreError::QuotaExceeded { .. }
        )
    }
}

/// Errors produced by provider capabilities (refresh, analytics, plugs).
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The platform rejected the token even though it had not expired.
    #[error("Token must be refreshed")]
    RefreshRequired,

    /// The provider does not implement the requested capability.
    #[error("Provider '{provider}' does not support {capability}")]
    Unsupported {
        provider: String,
        capability: String,
    },

    /// The call did not finish within the configured timeout.
    #[error("Provider call timed out after {secs} seconds")]
    Timeout { secs: u64 },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with something we could not use.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// The platform answered with an explicit error payload.
    #[error("Provider API error: {0}")]
    Api(String),

    /// A configured endpoint is not a usable URL.
    #[error("Invalid provider endpoint '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },

    /// The dedup ledger could not be consulted during a plug run.
    #[error("Dedup ledger unavailable: {0}")]
    Ledger(#[from] StoreError),
}

/// Repository-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored column could not be decoded.
    #[error("Corrupt record in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    /// The connection mutex was poisoned by a panicking holder.
    #[error("Store connection poisoned")]
    Poisoned,
}

/// Job queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue state unavailable: {0}")]
    Unavailable(String),

    #[error("Delay of {delay} ms is out of range")]
    InvalidDelay { delay: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Home or data directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Store(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_carries_limit() {
        let err = CoreError::QuotaExceeded { limit: 5 };
        assert!(err.to_string().contains('5'));
        assert!(err.is_client_error());
    }

    #[test]
    fn store_errors_are_not_client_errors() {
        let err = CoreError::Store(StoreError::Locked);
        assert!(!err.is_client_error());
    }

    #[test]
    fn not_found_formats_kind_and_id() {
        let err = CoreError::not_found("integration", "abc");
        assert_eq!(err.to_string(), "integration not found: abc");
    }
}
