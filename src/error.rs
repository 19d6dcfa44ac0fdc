//! Error kinds for the cache engine.
//!
//! These mirror the four error kinds the public contract distinguishes:
//! caller mistakes are reported synchronously, everything the store itself
//! can do wrong is swallowed at the façade boundary (see [`crate::facade`]).

use thiserror::Error;

/// Errors produced by the cache engine.
#[derive(Error, Debug)]
pub enum KvError {
    /// Null/empty partition or key, too many parent keys, a value the
    /// serializer rejects, or an unknown read mode. Raised synchronously;
    /// nothing is written.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a cache that has been shut down.
    #[error("cache has been disposed")]
    Disposed,

    /// The backend does not support the requested operation (e.g. `peek`
    /// on a backend declaring `can_peek = false`).
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Failure from the SQL engine, codec, or pool. Callers never see this
    /// variant directly — the façade swallows it into a benign return and
    /// records it via [`crate::facade::Cache::last_error`].
    #[error("internal store error: {0}")]
    InternalStoreError(String),
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, KvError>;

impl From<sqlx::Error> for KvError {
    fn from(e: sqlx::Error) -> Self {
        KvError::InternalStoreError(e.to_string())
    }
}

impl KvError {
    /// `true` for the store/codec failure category that the façade
    /// swallows rather than propagates.
    pub fn is_internal(&self) -> bool {
        matches!(self, KvError::InternalStoreError(_))
    }
}
