//! Off-chain store error types and result alias.
//!
//! Every [`OffchainStore`](crate::OffchainStore) implementation maps its
//! internal failures onto [`StorageError`] so that the coordinator can reason
//! about them without knowing which engine sits behind the trait.
//!
//! # Error Types
//!
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Serialization`] - Record encoding/decoding failures
//! - [`StorageError::Internal`] - Engine-specific internal errors
//! - [`StorageError::Timeout`] - Operation exceeded its time bound
//!
//! # Example
//!
//! ```
//! use assetlink_offchain_store::{StorageError, StorageResult};
//!
//! fn lookup(item_id: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::connection(format!("store unreachable while reading {item_id}")))
//! }
//! ```

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// A shareable boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for off-chain store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during off-chain store operations.
///
/// Errors preserve their source chain via the `#[source]` attribute. The type
/// is `Clone` so a failure can be carried inside higher-level results (for
/// example a partial-write report) and still be logged where it happened.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Connection or network error talking to the store.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The record could not be encoded for storage or decoded when read.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for engine-specific errors.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation exceeded its time bound.
    #[error("Operation timed out after {}ms", elapsed.as_millis())]
    Timeout {
        /// The bound that elapsed.
        elapsed: Duration,
    },
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error for the bound that elapsed.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Returns `true` for failures that may succeed if the same operation is
    /// attempted again later (connection drops and timeouts).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("invalid enrichment record encoding", err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::connection("refused").is_transient());
        assert!(StorageError::timeout(Duration::from_secs(5)).is_transient());
        assert!(!StorageError::serialization("bad json").is_transient());
        assert!(!StorageError::internal("boom").is_transient());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(StorageError::connection("refused").to_string(), "Connection error: refused");
        assert_eq!(
            StorageError::timeout(Duration::from_millis(1500)).to_string(),
            "Operation timed out after 1500ms"
        );
    }

    #[test]
    fn test_source_chain_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = StorageError::connection_with_source("store unreachable", io);
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("reset by peer"));
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err = StorageError::from(json_err);
        assert!(matches!(err, StorageError::Serialization { .. }));
    }
}
