/// A result type carrying the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that allocators, the registry and counter stores can produce.
///
/// Every variant leaves the in-memory allocator state untouched: an operation
/// that returns an error may be retried by the caller as-is.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The durable engine rejected a read or write.
    #[error("storage engine error: {0}")]
    Engine(#[from] fjall::Error),

    /// The counter entry for `key` does not exist (it was never created, or
    /// it was dropped).
    #[error("counter for key `{key}` does not exist")]
    MissingCounter { key: String },

    /// The stored counter value for `key` could not be decoded.
    #[error("counter for key `{key}` is corrupt")]
    CorruptCounter { key: String },

    /// Advancing the counter for `key` would overflow a signed 64-bit value.
    #[error("counter for key `{key}` would overflow")]
    Overflow { key: String },

    /// Keys must be non-empty.
    #[error("key is empty")]
    EmptyKey,

    /// Batch sizes must be strictly positive.
    #[error("batch size must be positive, got {0}")]
    InvalidBatchSize(i64),

    /// The store is temporarily unable to serve the request.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}
