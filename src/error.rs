//! Error types for warehouse queries and the result cache
//!
//! A single enum covers descriptor validation, gateway failures and cache
//! fetch failures. Errors are `Clone` so that one coalesced fetch outcome
//! can be handed to every caller waiting on it.

use thiserror::Error;

/// Main error type for warehouse and cache operations
#[derive(Error, Debug, Clone)]
pub enum WarehouseError {
    /// Malformed query descriptor - a caller bug, never retried
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Connection could not be established or reused
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed query or missing object in the warehouse
    #[error("Query error: {0}")]
    QueryError(String),

    /// Operation exceeded its configured duration
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    TimeoutError { timeout_ms: u64, context: String },

    /// A cache fetch failed; wraps the gateway error that caused it
    #[error("Fetch failed for {query}: {source}")]
    FetchError {
        query: String,
        #[source]
        source: Box<WarehouseError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for warehouse operations
pub type Result<T> = std::result::Result<T, WarehouseError>;

impl WarehouseError {
    /// Build a timeout error from a duration
    pub fn timeout(timeout: std::time::Duration, context: impl Into<String>) -> Self {
        WarehouseError::TimeoutError {
            timeout_ms: timeout.as_millis() as u64,
            context: context.into(),
        }
    }

    /// Wrap a gateway error raised while filling the cache
    pub fn fetch(query: impl Into<String>, cause: WarehouseError) -> Self {
        WarehouseError::FetchError {
            query: query.into(),
            source: Box::new(cause),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WarehouseError::ConnectionError(_) | WarehouseError::TimeoutError { .. } => true,
            WarehouseError::FetchError { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost cause, unwrapping any `FetchError` layers
    pub fn root_cause(&self) -> &WarehouseError {
        match self {
            WarehouseError::FetchError { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<String> for WarehouseError {
    fn from(s: String) -> Self {
        WarehouseError::Other(s)
    }
}

impl From<&str> for WarehouseError {
    fn from(s: &str) -> Self {
        WarehouseError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for WarehouseError {
    fn from(e: serde_json::Error) -> Self {
        WarehouseError::SerializationError(e.to_string())
    }
}
