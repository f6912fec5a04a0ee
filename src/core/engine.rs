use crate::core::entry::Entry;
use crate::core::error::Rejected;
use crate::metrics::MetricsSnapshot;

/// A concurrent, byte-bounded store keyed by content signature.
///
/// Every operation takes `&self` and is atomic with respect to every other
/// operation on the same engine. Ownership of a payload moves into the engine
/// on insertion and back out on [`get`](CacheEngine::get) or
/// [`delete`](CacheEngine::delete); the engine never shares a live payload.
///
/// # Eviction
/// When the occupied bytes exceed the budget after an insertion, the engine
/// destroys other entries, least recently used first, until it is back under
/// budget. The entry that was just inserted is never its own victim.
pub trait CacheEngine<V> {
    /// Inserts a new entry under `signature`.
    ///
    /// A signature that is still resident is rejected with
    /// [`CacheError::SignatureInUse`](crate::CacheError::SignatureInUse) and
    /// the payload comes back inside the [`Rejected`] value.
    fn put(&self, signature: u64, payload: V, size: usize, tag: u32) -> Result<(), Rejected<V>>;

    /// Inserts under `signature`, handing back the entry it displaced.
    ///
    /// The displaced entry is not destroyed; the caller owns it.
    fn replace(
        &self,
        signature: u64,
        payload: V,
        size: usize,
        tag: u32,
    ) -> Result<Option<Entry<V>>, Rejected<V>>;

    /// Takes the entry out of the cache.
    ///
    /// A miss is normal: the key may never have been inserted, or concurrent
    /// insertions may have evicted it.
    fn get(&self, signature: u64) -> Option<Entry<V>>;

    /// Removes the entry without touching hit statistics.
    ///
    /// `is_some()` tells whether the key was present. The destructor is not
    /// run; the caller owns the returned entry.
    fn delete(&self, signature: u64) -> Option<Entry<V>>;

    /// Inspects a resident entry in place and marks it most recently used.
    fn peek<R, F>(&self, signature: u64, f: F) -> Option<R>
    where
        F: FnOnce(&Entry<V>) -> R;

    /// Whether `signature` is resident. Leaves recency untouched.
    fn contains(&self, signature: u64) -> bool;

    /// Number of resident entries.
    fn len(&self) -> usize;

    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of resident entries.
    fn occupied_bytes(&self) -> usize;

    /// Byte budget fixed at construction.
    fn budget_bytes(&self) -> usize;

    fn metrics(&self) -> MetricsSnapshot;
}
