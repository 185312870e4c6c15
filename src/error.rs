//! Errors used throughout the library.

/// Convenience alias used by every fallible operation in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by locks, proxies and the connection pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A dotted path or path element failed validation.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// `acquire` exhausted its retry budget waiting for a foreign holder.
    #[error("lock timed out after {retries} retries")]
    LockTimeout {
        /// Total number of 50 ms polls performed before giving up.
        retries: u64,
    },
    /// The implementation got confused. This should only happen when
    /// somebody else tampers with the locking keys in the backend.
    #[error("internal error: {0}")]
    Internal(String),
    /// A stored value does not support the requested operation.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A stored payload was not valid JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A backend network or protocol failure, propagated unchanged.
    #[error(transparent)]
    Backend(#[from] redis::RedisError),
    /// The connection pool failed to hand out a connection.
    #[error(transparent)]
    Pool(#[from] r2d2::Error),
}
