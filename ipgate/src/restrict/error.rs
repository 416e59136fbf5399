/// Errors surfaced by the restriction engine and its adapters.
///
/// Only `StoreUnavailable` ever reaches the caller of `evaluate`; every other
/// variant is recovered locally by the component that produced it.
#[derive(Debug, thiserror::Error)]
pub enum RestrictError {
    /// Rule store cannot be reached (connection, query, IO, or timeout).
    #[error("rule store unavailable: {0}")]
    StoreUnavailable(String),

    /// Cache backing store read/write failure.
    #[error("cache backend error: {0}")]
    CacheBackend(String),
}

impl RestrictError {
    #[inline]
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    #[inline]
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::CacheBackend(err.to_string())
    }
}

impl From<sqlx::Error> for RestrictError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
