use std::collections::TryReserveError;
use std::fmt;
use thiserror::Error;

/// Failures reported by the cache engine and the recycling layer.
///
/// Misses and evictions are part of normal operation and never show up here.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A `put` targeted a signature that is still resident.
    #[error("signature {0:#018x} is already resident")]
    SignatureInUse(u64),

    /// The key index or the slot arena could not grow.
    #[error("failed to grow cache storage: {0}")]
    Allocation(#[from] TryReserveError),

    /// `enable` was called on a collector that is already running.
    #[error("garbage collector is already enabled")]
    AlreadyEnabled,
}

/// A payload the cache refused to take ownership of.
///
/// The payload is handed back untouched so the caller can release it or
/// retry; nothing was inserted.
#[derive(Error)]
#[error("{error}")]
pub struct Rejected<V> {
    #[source]
    error: CacheError,
    payload: V,
}

impl<V> Rejected<V> {
    #[inline]
    pub(crate) fn new(error: CacheError, payload: V) -> Self {
        Self { error, payload }
    }

    #[inline]
    pub fn error(&self) -> &CacheError {
        &self.error
    }

    #[inline]
    pub fn into_payload(self) -> V {
        self.payload
    }

    #[inline]
    pub fn into_parts(self) -> (CacheError, V) {
        (self.error, self.payload)
    }
}

impl<V> fmt::Debug for Rejected<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
