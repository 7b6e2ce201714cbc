//! Error types for lookup and ingestion operations.
//!
//! One flat taxonomy is shared across the data plane. Per-key failures are
//! *not* errors at this level: they travel inside
//! [`SingleLookupResult::Status`](crate::lookup::SingleLookupResult) so that a
//! failing key or shard never poisons the rest of a batch.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during lookup, query, and ingestion operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The request was malformed: bad query syntax or bad request shape.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable description of what was invalid.
        reason: String,
    },

    /// The requested entity does not exist.
    #[error("not found: {reason}")]
    NotFound {
        /// What was missing.
        reason: String,
    },

    /// An internal failure: shard RPC failure, missing shard client,
    /// serialization failure, or an inconsistent data record.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the failure.
        reason: String,
    },

    /// A batch or per-shard deadline expired.
    #[error("deadline exceeded after {duration_ms}ms")]
    DeadlineExceeded {
        /// Duration in milliseconds before the deadline fired.
        duration_ms: u64,
    },

    /// The encrypted request context was missing. Enforced at the edge;
    /// surfaced here only as a precondition failure.
    #[error("unauthenticated: {reason}")]
    Unauthenticated {
        /// Description of the missing precondition.
        reason: String,
    },
}

impl LookupError {
    /// Shorthand for an [`LookupError::Internal`] with the given reason.
    pub fn internal(reason: impl Into<String>) -> Self {
        LookupError::Internal { reason: reason.into() }
    }

    /// Shorthand for an [`LookupError::InvalidArgument`] with the given
    /// reason.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        LookupError::InvalidArgument { reason: reason.into() }
    }

    /// The wire code for this error kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            LookupError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            LookupError::NotFound { .. } => ErrorCode::NotFound,
            LookupError::Internal { .. } => ErrorCode::Internal,
            LookupError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            LookupError::Unauthenticated { .. } => ErrorCode::Unauthenticated,
        }
    }
}

/// Flat status codes carried inside per-key lookup results and across the
/// internal wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// No error.
    Ok,
    /// Malformed query or request shape.
    InvalidArgument,
    /// Key or key-set absent.
    NotFound,
    /// Shard RPC failure, missing client, serialization failure.
    Internal,
    /// Batch or per-shard timeout.
    DeadlineExceeded,
    /// Missing encrypted request context.
    Unauthenticated,
}
