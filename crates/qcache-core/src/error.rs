//! Error types for the caching query engine.

use thiserror::Error;

/// Result type alias for query-engine operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Errors surfaced by [`crate::QueryCore`] and [`crate::ScopedHandle`].
///
/// Predicate and key-function failures are deliberately *not* a variant here:
/// predicates are infallible `Fn(&T) -> bool` closures, and a "failure" is a
/// panic inside one. The enumerator orders its work so a panicking predicate
/// never leaves a cache partially mutated (see [`crate::filter_cache::FilterCache`]),
/// so the panic is left to propagate like any other Rust panic rather than
/// being caught and re-boxed into this enum.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A constructor argument failed validation: an out-of-range utilization
    /// threshold or an empty filter name.
    #[error("validation failed: {reason}")]
    ValidationError {
        /// Human-readable description of what failed validation.
        reason: String,
    },

    /// The requested operation is not supported by this engine.
    #[error("unsupported operation: {operation}")]
    UnsupportedOperation {
        /// Name of the unsupported operation (e.g. `"iterator reset"`).
        operation: String,
    },
}

impl QueryError {
    /// Build a [`QueryError::ValidationError`].
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError {
            reason: reason.into(),
        }
    }

    /// Build a [`QueryError::UnsupportedOperation`].
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Returns a stable, machine-readable classification of this error.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
        }
    }
}
