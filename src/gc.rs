//! Recycling allocator on top of [`LruCache`].
//!
//! [`GcState`] turns "free" into "maybe keep for later" for objects that are
//! tagged reusable and carry a signature, and turns "allocate an object with
//! this signature" into "hand back the one that was kept, if any".
//!
//! # Toggling
//! [`GcState::enable`] and [`GcState::disable`] take `&mut self`, so they
//! cannot overlap with workers that share the state through `&GcState`.
use crate::core::engine::CacheEngine;
use crate::core::entry::Entry;
use crate::core::error::CacheError;
use crate::lru::{CacheConfig, LruCache};
use crate::signature::NO_SIGNATURE;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the recycling layer needs to know about an object.
pub trait Cacheable {
    /// Bytes charged against the cache budget, auxiliary allocations included.
    fn size(&self) -> usize;

    /// Content signature, [`NO_SIGNATURE`] when the object has none.
    fn signature(&self) -> u64;

    /// Whether releasing the object may park it in the cache.
    fn is_reusable(&self) -> bool;

    /// Opaque classification stored alongside the cached object.
    fn type_tag(&self) -> u32 {
        0
    }
}

/// Recycling switch plus the cache it owns while enabled.
pub struct GcState<T> {
    cache: Option<LruCache<T>>,
    release: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> GcState<T>
where
    T: Cacheable + Send + 'static,
{
    /// A disabled collector whose real release is dropping the object.
    pub fn new() -> Self {
        Self::with_release(drop)
    }

    /// A disabled collector that really releases objects through `release`.
    ///
    /// `release` also serves as the cache destructor, so evicted objects and
    /// objects still parked at [`disable`](Self::disable) go through it.
    pub fn with_release<R>(release: R) -> Self
    where
        R: Fn(T) + Send + Sync + 'static,
    {
        Self {
            cache: None,
            release: Arc::new(release),
        }
    }

    /// Starts recycling with a cache of `budget_bytes`.
    pub fn enable(&mut self, budget_bytes: usize) -> Result<(), CacheError> {
        self.enable_with(CacheConfig::new(budget_bytes))
    }

    pub fn enable_with(&mut self, config: CacheConfig) -> Result<(), CacheError> {
        if self.cache.is_some() {
            warn!("garbage collector enabled twice");
            return Err(CacheError::AlreadyEnabled);
        }

        let release = Arc::clone(&self.release);
        self.cache = Some(LruCache::with_config(config, move |object| release(object)));

        debug!(budget_bytes = config.budget_bytes, "garbage collector enabled");
        Ok(())
    }

    /// Stops recycling, really releasing every parked object.
    ///
    /// Returns how many objects were released; `0` when already disabled.
    pub fn disable(&mut self) -> usize {
        let Some(cache) = self.cache.take() else {
            return 0;
        };

        let released = cache.close();
        debug!(released, "garbage collector disabled");
        released
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// The backing cache while enabled.
    #[inline]
    pub fn cache(&self) -> Option<&LruCache<T>> {
        self.cache.as_ref()
    }

    fn recycle(&self, signature: u64) -> Option<T> {
        if signature == NO_SIGNATURE {
            return None;
        }

        self.cache
            .as_ref()?
            .get(signature)
            .map(Entry::into_payload)
    }

    /// Returns the parked object for `signature`, or builds a fresh one.
    ///
    /// `constructor` only runs on a miss, when disabled, or for
    /// [`NO_SIGNATURE`].
    pub fn allocate_with_signature<F>(&self, signature: u64, constructor: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.recycle(signature).unwrap_or_else(constructor)
    }

    /// Like [`allocate_with_signature`](Self::allocate_with_signature) for
    /// constructors that can fail.
    pub fn try_allocate_with_signature<F, E>(&self, signature: u64, constructor: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        match self.recycle(signature) {
            Some(object) => Ok(object),
            None => constructor(),
        }
    }

    /// Parks a reusable, signed object in the cache; releases anything else.
    ///
    /// An object whose signature is already parked is released for real and
    /// the conflict is reported, the parked one stays.
    pub fn release(&self, object: T) -> Result<(), CacheError> {
        let cache = match &self.cache {
            Some(cache) if object.is_reusable() && object.signature() != NO_SIGNATURE => cache,
            _ => {
                self.release_immediately(object);
                return Ok(());
            }
        };

        let (signature, size, tag) = (object.signature(), object.size(), object.type_tag());

        cache.put(signature, object, size, tag).map_err(|rejected| {
            let (error, object) = rejected.into_parts();
            self.release_immediately(object);
            error
        })
    }

    /// Releases `object` now, bypassing the cache whatever its tags.
    #[inline]
    pub fn release_immediately(&self, object: T) {
        (self.release)(object);
    }
}

impl<T> Default for GcState<T>
where
    T: Cacheable + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for GcState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcState")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
