//! Error types for TokMesh
//!
//! A single unified error enum spans the whole system. Storage-level failures
//! (I/O, serialization, corruption) are distinct variants so lower layers can
//! match on them, but they all surface to API consumers as `INTERNAL`; the
//! domain kinds carry stable machine-readable codes and an HTTP status
//! mapping for the REST collaborators.

use std::io;
use thiserror::Error;

/// Result type alias for TokMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the TokMesh core
#[derive(Debug, Error)]
pub enum Error {
    /// Session does not exist in the live set
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but its expiry is in the past
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// A session with this ID already exists
    #[error("session already exists: {0}")]
    SessionConflict(String),

    /// Optimistic version check failed
    #[error("session version conflict: expected {expected}, found {actual}")]
    SessionVersionConflict {
        /// Version the caller expected to replace
        expected: u64,
        /// Version actually stored
        actual: u64,
    },

    /// User reached the per-user live session limit
    #[error("session quota exceeded for user {user_id} (limit {limit})")]
    SessionQuotaExceeded {
        /// User whose quota is exhausted
        user_id: String,
        /// Configured per-user limit
        limit: usize,
    },

    /// Token failed validation (unknown, malformed, or rotated away)
    #[error("token invalid")]
    TokenInvalid,

    /// Another live session already owns this token hash
    #[error("token hash conflict")]
    TokenHashConflict,

    /// API key does not exist
    #[error("api key not found: {0}")]
    ApiKeyNotFound(String),

    /// An API key with this ID already exists
    #[error("api key already exists: {0}")]
    ApiKeyConflict(String),

    /// Caller supplied an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// On-disk data failed a checksum or framing check
    #[error("data corruption: {0}")]
    Corruption(String),

    /// No snapshot files exist in the snapshot directory
    #[error("no snapshots available")]
    NoSnapshots,

    /// Operation was cancelled or ran past its deadline
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error (file operations, fsync, rename)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cipher, KDF, or CSPRNG failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Unexpected invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Stable machine-readable code for the wire envelope and the
    /// `X-Error-Code` response header.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::SessionExpired(_) => "SESSION_EXPIRED",
            Error::SessionConflict(_) => "SESSION_CONFLICT",
            Error::SessionVersionConflict { .. } => "SESSION_VERSION_CONFLICT",
            Error::SessionQuotaExceeded { .. } => "SESSION_QUOTA_EXCEEDED",
            Error::TokenInvalid => "TOKEN_INVALID",
            Error::TokenHashConflict => "TOKEN_HASH_CONFLICT",
            Error::ApiKeyNotFound(_) => "API_KEY_NOT_FOUND",
            Error::ApiKeyConflict(_) => "API_KEY_CONFLICT",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Corruption(_)
            | Error::NoSnapshots
            | Error::Cancelled
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Crypto(_)
            | Error::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status the REST surface maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::SessionNotFound(_) | Error::ApiKeyNotFound(_) => 404,
            Error::SessionExpired(_) => 401,
            Error::SessionConflict(_)
            | Error::SessionVersionConflict { .. }
            | Error::TokenHashConflict
            | Error::ApiKeyConflict(_) => 409,
            Error::SessionQuotaExceeded { .. } => 429,
            Error::InvalidArgument(_) | Error::TokenInvalid => 400,
            _ => 500,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only optimistic version conflicts are worth retrying; everything else
    /// is either permanent or needs operator attention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::SessionVersionConflict { .. })
    }

    /// Wrap a storage-level error with context, preserving the domain kind
    /// of errors that already carry one.
    pub fn with_context(self, context: &str) -> Error {
        match self {
            Error::Io(e) => Error::Internal(format!("{context}: {e}")),
            Error::Serialization(e) => Error::Internal(format!("{context}: {e}")),
            Error::Crypto(e) => Error::Crypto(format!("{context}: {e}")),
            Error::Corruption(e) => Error::Corruption(format!("{context}: {e}")),
            Error::Internal(e) => Error::Internal(format!("{context}: {e}")),
            other => other,
        }
    }
}
