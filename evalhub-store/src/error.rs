//! Error types for document store operations.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur at the store boundary.
///
/// The classification feeds retry policy: [`StoreError::is_transient`]
/// returns true only for failures worth re-attempting.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the backing store.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store did not respond within its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A document with the same identifier already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The document or query was malformed.
    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    /// Whether this failure is transient and eligible for retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Stable label for logs and wrapped errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
        }
    }
}
