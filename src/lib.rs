//! Size-bounded, content-addressed object cache.
//!
//! Objects are registered under a 64-bit content [signature] and may later be
//! handed back instead of being rebuilt. The [`LruCache`] engine bounds the
//! aggregate byte size of what it holds and evicts least recently used
//! entries through a caller-supplied destructor. [`GcState`] layers a
//! recycling allocator over it: releasing a reusable object parks it in the
//! cache, allocating with a known signature checks the cache first.
//!
//! ```
//! use sigcache::{generate_signature, CacheEngine, LruCache, EOF_MARKER};
//!
//! let cache = LruCache::new(1 << 20, 8, drop);
//! let signature = generate_signature(b"matrix 3x3", EOF_MARKER);
//!
//! cache.put(signature, vec![0u8; 9], 9, 0).unwrap();
//! let entry = cache.get(signature).unwrap();
//! assert_eq!(entry.into_payload().len(), 9);
//! ```
extern crate self as sigcache;

pub use crate::core::backoff::{Backoff, BackoffConfig, BackoffPolicy};
pub use crate::core::engine::CacheEngine;
pub use crate::core::entry::Entry;
pub use crate::core::error::{CacheError, Rejected};
pub use crate::gc::{Cacheable, GcState};
pub use crate::lru::{CacheConfig, Destructor, LruCache, DEFAULT_GRANULARITY};
pub use crate::metrics::{LatencyPercentile, MetricsConfig, MetricsSnapshot};
pub use crate::signature::{derive_signature, generate_signature, EOF_MARKER, NO_SIGNATURE};
pub use sigcache_macros::cache;

pub mod core;
pub mod gc;
pub mod lru;
pub mod metrics;
pub mod signature;
