use crate::core::backoff::BackoffConfig;
use crate::core::engine::CacheEngine;
use crate::core::entry::Entry;
use crate::core::error::{CacheError, Rejected};
use crate::metrics::{Metrics, MetricsConfig, MetricsSnapshot};
use Sweep::{Contended, Evicted, Exhausted, Raced};
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::collections::{HashMap, TryReserveError};
use std::fmt;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Shard count used when no granularity is given.
pub const DEFAULT_GRANULARITY: usize = 1;

const MAX_SHARDS: usize = 1024;

/// Non-blocking sweeps tried before the evictor waits on shard locks.
const CONTENDED_SWEEPS: usize = 4;

const NIL: usize = usize::MAX;

/// Release routine run on evicted entries and on entries left at close.
pub type Destructor<V> = Box<dyn Fn(V) + Send + Sync>;

/// Construction parameters of an [`LruCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Aggregate entry size above which eviction starts.
    pub budget_bytes: usize,
    /// Shard count hint, rounded up to a power of two and capped at 1024.
    /// Any value is correct, `0` behaves like `1`.
    pub granularity: usize,
    pub backoff: BackoffConfig,
    pub metrics: MetricsConfig,
}

impl CacheConfig {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            granularity: DEFAULT_GRANULARITY,
            backoff: BackoffConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    #[must_use]
    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    fn shard_count(&self) -> usize {
        self.granularity.clamp(1, MAX_SHARDS).next_power_of_two()
    }
}

/// Recency links of one arena slot. `prev` points towards the most recently
/// used end, `next` towards the least recently used end.
#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
    stamp: u64,
}

impl Link {
    const DETACHED: Link = Link {
        prev: NIL,
        next: NIL,
        stamp: 0,
    };
}

/// One lock domain: a signature index over a slot arena plus an intrusive
/// recency list threaded through the arena.
///
/// # Invariants
/// - `index[sig] == slot` iff `entries[slot]` holds the entry for `sig`.
/// - A slot is on the recency list iff its entry has a non-zero size.
/// - Free slots are listed in `vacant` and hold `None`.
struct Shard<V> {
    index: HashMap<u64, usize>,
    entries: Vec<Option<Entry<V>>>,
    links: Vec<Link>,
    vacant: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            links: Vec::new(),
            vacant: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    #[inline]
    fn contains(&self, signature: u64) -> bool {
        self.index.contains_key(&signature)
    }

    /// Grows every structure one insertion can touch, so that the insertion
    /// itself cannot fail halfway.
    fn reserve(&mut self) -> Result<(), TryReserveError> {
        self.index.try_reserve(1)?;

        if self.vacant.is_empty() {
            self.entries.try_reserve(1)?;
            self.links.try_reserve(1)?;
            self.vacant.try_reserve(self.entries.len() + 1)?;
        }

        Ok(())
    }

    fn insert(&mut self, entry: Entry<V>, stamp: u64) {
        let slot = match self.vacant.pop() {
            Some(slot) => slot,
            None => {
                self.entries.push(None);
                self.links.push(Link::DETACHED);
                self.entries.len() - 1
            }
        };

        let tracked = entry.size() > 0;
        self.index.insert(entry.signature(), slot);
        self.entries[slot] = Some(entry);

        if tracked {
            self.push_front(slot, stamp);
        }
    }

    fn remove(&mut self, signature: u64) -> Option<Entry<V>> {
        let slot = self.index.remove(&signature)?;
        self.release(slot)
    }

    fn release(&mut self, slot: usize) -> Option<Entry<V>> {
        let entry = self.entries[slot].take()?;

        if entry.size() > 0 {
            self.unlink(slot);
        }

        self.vacant.push(slot);
        Some(entry)
    }

    /// Moves a resident entry to the most recently used end.
    fn touch(&mut self, signature: u64, stamp: u64) -> Option<&Entry<V>> {
        let slot = *self.index.get(&signature)?;
        let tracked = self.entries[slot].as_ref()?.size() > 0;

        if tracked {
            self.unlink(slot);
            self.push_front(slot, stamp);
        }

        self.entries[slot].as_ref()
    }

    /// Least recently used slot other than `keep`, with its stamp.
    fn lru_candidate(&self, keep: u64) -> Option<(usize, u64)> {
        let mut slot = self.tail;

        while slot != NIL {
            match &self.entries[slot] {
                Some(entry) if entry.signature() != keep => {
                    return Some((slot, self.links[slot].stamp));
                }
                _ => slot = self.links[slot].prev,
            }
        }

        None
    }

    fn lru_candidate_size(&self, keep: u64) -> Option<usize> {
        let (slot, _) = self.lru_candidate(keep)?;
        self.entries[slot].as_ref().map(Entry::size)
    }

    fn evict_lru(&mut self, keep: u64) -> Option<Entry<V>> {
        let (slot, _) = self.lru_candidate(keep)?;
        let signature = self.entries[slot].as_ref()?.signature();

        self.index.remove(&signature);
        self.release(slot)
    }

    fn drain(&mut self) -> impl Iterator<Item = Entry<V>> + '_ {
        self.index.clear();
        self.links.clear();
        self.vacant.clear();
        self.head = NIL;
        self.tail = NIL;

        self.entries.drain(..).flatten()
    }

    fn push_front(&mut self, slot: usize, stamp: u64) {
        self.links[slot] = Link {
            prev: NIL,
            next: self.head,
            stamp,
        };

        if self.head == NIL {
            self.tail = slot;
        } else {
            self.links[self.head].prev = slot;
        }

        self.head = slot;
    }

    fn unlink(&mut self, slot: usize) {
        let Link { prev, next, .. } = self.links[slot];

        if prev == NIL {
            self.head = next;
        } else {
            self.links[prev].next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.links[next].prev = prev;
        }

        self.links[slot] = Link::DETACHED;
    }
}

/// Outcome of one eviction sweep over the shards.
enum Sweep<V> {
    Evicted(Entry<V>),
    /// The chosen victim vanished, or another evictor settled the overflow,
    /// before its shard could be locked again.
    Raced,
    /// Some shards were skipped because their lock was held.
    Contended,
    /// Nothing but the protected entry and zero-sized entries is resident.
    Exhausted,
}

/// Concurrent byte-bounded cache with approximate LRU eviction.
///
/// Signatures are spread over `granularity` shards, each guarded by its own
/// mutex and holding its own recency list. Every insertion and promotion
/// takes a stamp from a global clock, and the evictor compares the stamps at
/// the tails of all shards, so the victim is the globally least recently used
/// entry up to races between concurrent writers.
///
/// Occupied bytes and entry count are kept in shared atomics that are only
/// updated while the owning shard's lock is held.
pub struct LruCache<V> {
    shards: Box<[CachePadded<Mutex<Shard<V>>>]>,
    mask: usize,
    budget: usize,
    occupied: CachePadded<AtomicUsize>,
    len: CachePadded<AtomicUsize>,
    clock: CachePadded<AtomicU64>,
    destructor: Destructor<V>,
    backoff: BackoffConfig,
    metrics: Metrics,
}

impl<V> LruCache<V> {
    /// Creates an empty cache.
    ///
    /// `destructor` receives every payload the cache gives up on its own:
    /// evicted entries and entries still resident at [`close`](Self::close).
    pub fn new<D>(budget_bytes: usize, granularity: usize, destructor: D) -> Self
    where
        D: Fn(V) + Send + Sync + 'static,
    {
        Self::with_config(
            CacheConfig::new(budget_bytes).with_granularity(granularity),
            destructor,
        )
    }

    pub fn with_config<D>(config: CacheConfig, destructor: D) -> Self
    where
        D: Fn(V) + Send + Sync + 'static,
    {
        let shard_count = config.shard_count();
        let shards = (0..shard_count)
            .map(|_| CachePadded::new(Mutex::new(Shard::new())))
            .collect();

        debug!(
            budget_bytes = config.budget_bytes,
            shards = shard_count,
            "signature cache created"
        );

        Self {
            shards,
            mask: shard_count - 1,
            budget: config.budget_bytes,
            occupied: CachePadded::new(AtomicUsize::new(0)),
            len: CachePadded::new(AtomicUsize::new(0)),
            clock: CachePadded::new(AtomicU64::new(0)),
            destructor: Box::new(destructor),
            backoff: config.backoff,
            metrics: Metrics::new(config.metrics),
        }
    }

    /// Destroys every resident entry and tears the cache down.
    ///
    /// Taking `self` makes close the last operation on the cache. Returns the
    /// number of entries handed to the destructor.
    pub fn close(mut self) -> usize {
        let destroyed = self.destroy_resident();
        debug!(destroyed, "signature cache closed");
        destroyed
    }

    #[inline]
    fn shard(&self, signature: u64) -> &Mutex<Shard<V>> {
        &self.shards[spread(signature) as usize & self.mask]
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Relaxed)
    }

    fn insert(
        &self,
        signature: u64,
        payload: V,
        size: usize,
        tag: u32,
        overwrite: bool,
    ) -> Result<Option<Entry<V>>, Rejected<V>> {
        let called_at = Instant::now();

        let displaced = {
            let mut shard = self.shard(signature).lock();

            if !overwrite && shard.contains(signature) {
                drop(shard);
                warn!("rejected put: signature {signature:#018x} is already resident");
                self.metrics.record_rejection();
                return Err(Rejected::new(CacheError::SignatureInUse(signature), payload));
            }

            if let Err(error) = shard.reserve() {
                drop(shard);
                warn!(%error, "rejected put: cache storage cannot grow");
                self.metrics.record_rejection();
                return Err(Rejected::new(error.into(), payload));
            }

            let displaced = shard.remove(signature);
            if let Some(previous) = &displaced {
                self.occupied.fetch_sub(previous.size(), AcqRel);
                self.len.fetch_sub(1, AcqRel);
            }

            shard.insert(Entry::new(signature, payload, size, tag), self.tick());
            self.occupied.fetch_add(size, AcqRel);
            self.len.fetch_add(1, AcqRel);

            displaced
        };

        self.evict_for(signature);
        self.metrics
            .record_latency(called_at.elapsed().as_nanos() as u64);

        Ok(displaced)
    }

    fn take(&self, signature: u64) -> Option<Entry<V>> {
        let mut shard = self.shard(signature).lock();
        let entry = shard.remove(signature)?;

        self.occupied.fetch_sub(entry.size(), AcqRel);
        self.len.fetch_sub(1, AcqRel);

        Some(entry)
    }

    /// Evicts other entries until the budget holds again or nothing else can
    /// go. `keep` is the signature that was just inserted.
    fn evict_for(&self, keep: u64) {
        let mut backoff = self.backoff.build();
        let mut contended_sweeps = 0;

        while self.occupied.load(Acquire) > self.budget {
            match self.sweep(keep, contended_sweeps >= CONTENDED_SWEEPS) {
                Evicted(victim) => {
                    trace!(
                        signature = victim.signature(),
                        size = victim.size(),
                        "evicting entry"
                    );
                    self.metrics.record_eviction();
                    (self.destructor)(victim.into_payload());
                }
                Raced => {}
                Contended => {
                    contended_sweeps += 1;
                    backoff.backoff();
                }
                Exhausted => break,
            }
        }
    }

    /// Picks the shard whose LRU tail carries the oldest stamp and evicts
    /// that shard's tail.
    fn sweep(&self, keep: u64, blocking: bool) -> Sweep<V> {
        let mut oldest: Option<(usize, u64)> = None;
        let mut contended = false;

        for (position, shard) in self.shards.iter().enumerate() {
            let guard = if blocking {
                shard.lock()
            } else {
                match shard.try_lock() {
                    Some(guard) => guard,
                    None => {
                        contended = true;
                        continue;
                    }
                }
            };

            if let Some((_, stamp)) = guard.lru_candidate(keep) {
                if oldest.map_or(true, |(_, best)| stamp < best) {
                    oldest = Some((position, stamp));
                }
            }
        }

        let Some((position, _)) = oldest else {
            return if contended { Contended } else { Exhausted };
        };

        let mut shard = self.shards[position].lock();
        let Some(size) = shard.lru_candidate_size(keep) else {
            return Raced;
        };

        // Bytes are claimed only while still over budget.
        let claimed = self.occupied.fetch_update(AcqRel, Acquire, |occupied| {
            (occupied > self.budget).then(|| occupied - size)
        });
        if claimed.is_err() {
            return Raced;
        }

        match shard.evict_lru(keep) {
            Some(victim) => {
                self.len.fetch_sub(1, AcqRel);
                Evicted(victim)
            }
            None => {
                self.occupied.fetch_add(size, AcqRel);
                Raced
            }
        }
    }

    fn destroy_resident(&mut self) -> usize {
        let mut destroyed = 0;

        for shard in self.shards.iter_mut() {
            for entry in shard.get_mut().drain() {
                (self.destructor)(entry.into_payload());
                destroyed += 1;
            }
        }

        self.occupied.store(0, Relaxed);
        self.len.store(0, Relaxed);

        destroyed
    }
}

impl<V> CacheEngine<V> for LruCache<V> {
    fn put(&self, signature: u64, payload: V, size: usize, tag: u32) -> Result<(), Rejected<V>> {
        self.insert(signature, payload, size, tag, false)
            .map(|_| ())
    }

    fn replace(
        &self,
        signature: u64,
        payload: V,
        size: usize,
        tag: u32,
    ) -> Result<Option<Entry<V>>, Rejected<V>> {
        self.insert(signature, payload, size, tag, true)
    }

    fn get(&self, signature: u64) -> Option<Entry<V>> {
        let called_at = Instant::now();
        let entry = self.take(signature);

        match entry {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        self.metrics
            .record_latency(called_at.elapsed().as_nanos() as u64);

        entry
    }

    #[inline]
    fn delete(&self, signature: u64) -> Option<Entry<V>> {
        self.take(signature)
    }

    /// `f` runs while the shard lock is held and must not call back into
    /// the cache.
    fn peek<R, F>(&self, signature: u64, f: F) -> Option<R>
    where
        F: FnOnce(&Entry<V>) -> R,
    {
        let mut shard = self.shard(signature).lock();
        let stamp = self.tick();

        shard.touch(signature, stamp).map(f)
    }

    #[inline]
    fn contains(&self, signature: u64) -> bool {
        self.shard(signature).lock().contains(signature)
    }

    #[inline]
    fn len(&self) -> usize {
        self.len.load(Acquire)
    }

    #[inline]
    fn occupied_bytes(&self) -> usize {
        self.occupied.load(Acquire)
    }

    #[inline]
    fn budget_bytes(&self) -> usize {
        self.budget
    }

    #[inline]
    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<V> Drop for LruCache<V> {
    fn drop(&mut self) {
        self.destroy_resident();
    }
}

impl<V> fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("shards", &self.shards.len())
            .field("budget", &self.budget)
            .field("occupied", &self.occupied_bytes())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Finalizer of MurmurHash3; caller-chosen signatures are not always well
/// distributed in their low bits.
#[inline]
fn spread(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^= hash >> 33;
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Destructor that counts calls and remembers which payloads it saw.
    #[derive(Clone, Default)]
    struct Graveyard {
        calls: Arc<AtomicUsize>,
        buried: Arc<Mutex<Vec<u64>>>,
    }

    impl Graveyard {
        fn destructor(&self) -> impl Fn(u64) + Send + Sync + 'static {
            let graveyard = self.clone();
            move |payload| {
                graveyard.calls.fetch_add(1, Relaxed);
                graveyard.buried.lock().push(payload);
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Relaxed)
        }

        fn buried(&self) -> Vec<u64> {
            self.buried.lock().clone()
        }
    }

    fn unique_signatures(count: usize) -> Vec<u64> {
        let mut seen = HashSet::with_capacity(count);
        let mut signatures = Vec::with_capacity(count);

        while signatures.len() < count {
            let signature = fastrand::u64(1..);
            if seen.insert(signature) {
                signatures.push(signature);
            }
        }

        signatures
    }

    #[test]
    fn test_put_then_get_returns_exact_entry() {
        let cache = LruCache::new(1024, 1, drop);

        cache.put(42, "payload".to_string(), 17, 9).expect("fresh key");
        let entry = cache.get(42).expect("entry should be resident");

        assert_eq!(entry.signature(), 42);
        assert_eq!(entry.size(), 17);
        assert_eq!(entry.tag(), 9);
        assert_eq!(entry.into_payload(), "payload");
        assert!(cache.is_empty());
        assert_eq!(cache.occupied_bytes(), 0);
    }

    #[test]
    fn test_get_misses_unknown_and_deleted_keys() {
        let cache = LruCache::new(1024, 4, drop);

        assert!(cache.get(1).is_none());

        cache.put(1, 10u64, 8, 0).expect("fresh key");
        assert!(cache.delete(1).is_some());
        assert!(cache.get(1).is_none());
        assert!(cache.delete(1).is_none(), "deleting twice is a no-op");

        let snapshot = cache.metrics();
        assert_eq!(snapshot.hit_count(), 0);
        assert_eq!(snapshot.miss_count(), 2);
    }

    #[test]
    fn test_delete_hands_back_without_destructor() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(1024, 1, graveyard.destructor());

        cache.put(7, 700, 3, 5).expect("fresh key");
        let (payload, size, tag) = cache.delete(7).expect("key present").into_parts();

        assert_eq!((payload, size, tag), (700, 3, 5));
        drop(cache);
        assert_eq!(graveyard.calls(), 0);
    }

    #[test]
    fn test_put_rejects_resident_signature() {
        let cache = LruCache::new(1024, 1, drop);

        cache.put(3, 1u64, 8, 0).expect("fresh key");
        let rejected = cache.put(3, 2u64, 8, 0).expect_err("key is resident");

        assert!(matches!(rejected.error(), CacheError::SignatureInUse(3)));
        assert_eq!(rejected.into_payload(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.occupied_bytes(), 8);
        assert_eq!(cache.metrics().rejection_count(), 1);
        assert_eq!(cache.get(3).map(Entry::into_payload), Some(1));
    }

    #[test]
    fn test_replace_returns_displaced_entry() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(1024, 1, graveyard.destructor());

        assert!(cache.replace(5, 1, 10, 0).expect("fits").is_none());
        let displaced = cache.replace(5, 2, 20, 1).expect("fits").expect("was resident");

        assert_eq!(displaced.into_parts(), (1, 10, 0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.occupied_bytes(), 20);
        assert_eq!(graveyard.calls(), 0);
    }

    #[test]
    fn test_sequential_put_delete_replay() {
        const N: usize = 20_000;
        let signatures = unique_signatures(N);
        let cache = LruCache::new(N, 1, drop);

        for (i, &signature) in signatures.iter().enumerate() {
            cache.put(signature, i as u64, 1, 0).expect("fresh key");
            assert_eq!(cache.len(), i + 1);
        }

        for (i, &signature) in signatures.iter().enumerate() {
            assert!(cache.delete(signature).is_some());
            assert_eq!(cache.len(), N - 1 - i);
        }

        let mut expected = vec![None; N];
        for (i, &signature) in signatures.iter().enumerate() {
            if fastrand::usize(..3) != 0 {
                let payload = (N + i) as u64;
                cache.put(signature, payload, 1, 0).expect("cache was emptied");
                expected[i] = Some(payload);
            }
        }

        for (i, &signature) in signatures.iter().enumerate() {
            if fastrand::usize(..3) == 0 {
                cache.delete(signature);
                expected[i] = None;
            } else {
                let payload = (2 * N + i) as u64;
                cache.replace(signature, payload, 1, 0).expect("fits");
                expected[i] = Some(payload);
            }
        }

        let live = expected.iter().filter(|payload| payload.is_some()).count();
        assert_eq!(cache.len(), live);

        for (i, &signature) in signatures.iter().enumerate() {
            let found = cache.get(signature).map(Entry::into_payload);
            assert_eq!(found, expected[i], "signature at {i}");
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_least_recently_used_first() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(30, 1, graveyard.destructor());

        cache.put(1, 1, 10, 0).expect("fresh key");
        cache.put(2, 2, 10, 0).expect("fresh key");
        cache.put(3, 3, 10, 0).expect("fresh key");
        assert_eq!(graveyard.calls(), 0);

        cache.put(4, 4, 10, 0).expect("fresh key");

        assert_eq!(graveyard.buried(), vec![1]);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.occupied_bytes(), 30);
        assert_eq!(cache.metrics().eviction_count(), 1);
    }

    #[test]
    fn test_peek_protects_from_eviction() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(30, 1, graveyard.destructor());

        for signature in 1..=3 {
            cache.put(signature, signature, 10, 0).expect("fresh key");
        }

        assert_eq!(cache.peek(1, |entry| *entry.payload()), Some(1));
        cache.put(4, 4, 10, 0).expect("fresh key");

        assert_eq!(graveyard.buried(), vec![2]);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_contains_leaves_recency_alone() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(30, 1, graveyard.destructor());

        for signature in 1..=3 {
            cache.put(signature, signature, 10, 0).expect("fresh key");
        }

        assert!(cache.contains(1));
        cache.put(4, 4, 10, 0).expect("fresh key");

        assert_eq!(graveyard.buried(), vec![1]);
        assert!(!cache.contains(1));
    }

    #[test]
    fn test_eviction_spans_shards_in_recency_order() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(50, 16, graveyard.destructor());

        for signature in 1..=5 {
            cache.put(signature, signature, 10, 0).expect("fresh key");
        }
        for signature in 6..=8 {
            cache.put(signature, signature, 10, 0).expect("fresh key");
        }

        assert_eq!(graveyard.buried(), vec![1, 2, 3]);
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_oversized_entry_is_kept_and_evicts_others() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(10, 1, graveyard.destructor());

        cache.put(1, 1, 5, 0).expect("fresh key");
        cache.put(2, 2, 50, 0).expect("fresh key");

        assert_eq!(graveyard.buried(), vec![1]);
        assert!(cache.contains(2));
        assert_eq!(cache.occupied_bytes(), 50);

        cache.put(3, 3, 5, 0).expect("fresh key");

        assert_eq!(graveyard.buried(), vec![1, 2]);
        assert_eq!(cache.occupied_bytes(), 5);
    }

    #[test]
    fn test_zero_budget_keeps_only_latest() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(0, 1, graveyard.destructor());

        cache.put(1, 1, 1, 0).expect("fresh key");
        assert_eq!(cache.len(), 1);

        cache.put(2, 2, 1, 0).expect("fresh key");
        assert_eq!(graveyard.buried(), vec![1]);
        assert!(cache.contains(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_sized_entries_are_never_evicted() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(10, 1, graveyard.destructor());

        cache.put(100, 100, 0, 0).expect("fresh key");
        cache.put(1, 1, 10, 0).expect("fresh key");
        cache.put(2, 2, 10, 0).expect("fresh key");

        assert_eq!(graveyard.buried(), vec![1]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.occupied_bytes(), 10);
        assert_eq!(cache.get(100).map(Entry::into_payload), Some(100));
    }

    #[test]
    fn test_any_granularity_is_valid() {
        for granularity in [0, 1, 3, 64, usize::MAX] {
            let cache = LruCache::new(100, granularity, drop);
            cache.put(9, 9u8, 1, 0).expect("fresh key");
            assert_eq!(cache.get(9).map(Entry::into_payload), Some(9));
        }
    }

    #[test]
    fn test_close_destroys_each_resident_once() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(1024, 4, graveyard.destructor());

        for signature in 1..=10 {
            cache.put(signature, signature, 1, 0).expect("fresh key");
        }
        for signature in 1..=3 {
            cache.get(signature).expect("resident");
        }
        for signature in 4..=5 {
            cache.delete(signature).expect("resident");
        }

        assert_eq!(cache.close(), 5);

        let mut buried = graveyard.buried();
        buried.sort_unstable();
        assert_eq!(buried, vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_drop_destroys_resident() {
        let graveyard = Graveyard::default();
        let cache = LruCache::new(1024, 2, graveyard.destructor());

        cache.put(1, 1, 1, 0).expect("fresh key");
        cache.put(2, 2, 1, 0).expect("fresh key");
        drop(cache);

        assert_eq!(graveyard.calls(), 2);
    }

    /// Fills the cache past its budget in signature order, then reads back
    /// from the newest entry down, like the recycling path does.
    fn hit_rate(budget_percent: usize, granularity: usize) -> f64 {
        const N: usize = 50_000;
        const SIZE: usize = 24;
        let cache = LruCache::new(SIZE * N * budget_percent / 100, granularity, drop);

        for i in 0..N {
            cache.put(i as u64 + 1, i, SIZE, 0).expect("fresh key");
        }

        let (mut hits, mut total) = (0usize, 0usize);
        for i in (N * 6 / 100 + 1..N).rev() {
            if cache.get(i as u64 + 1).is_some_and(|entry| *entry.payload() == i) {
                hits += 1;
            }
            total += 1;
        }

        let rate = hits as f64 / total as f64;
        assert!((cache.metrics().hit_rate() - rate).abs() < 1e-9);
        rate
    }

    #[test]
    fn test_hit_rate_tracks_budget() {
        let generous = hit_rate(90, 1);
        let tight = hit_rate(45, 1);

        assert!(generous > 0.95, "hit rate {generous} should exceed 95%");
        assert!(tight > 0.47, "hit rate {tight} should exceed 47%");
        assert!(generous > tight);

        let sharded = hit_rate(90, 32);
        assert!(sharded > 0.95, "sharded hit rate {sharded} should exceed 95%");
    }

    #[test]
    fn test_parallel_put_delete_get() {
        const N: usize = 100_000;

        struct Key {
            signature: u64,
            expected: Option<u64>,
        }

        let mut keys = unique_signatures(N)
            .into_iter()
            .map(|signature| Key {
                signature,
                expected: None,
            })
            .collect::<Vec<_>>();
        let cache = LruCache::new(N, 16, drop);

        keys.par_iter().enumerate().for_each(|(i, key)| {
            cache.put(key.signature, i as u64, 1, 0).expect("fresh key");
        });
        assert_eq!(cache.len(), N);

        keys.par_iter().for_each(|key| {
            assert!(cache.delete(key.signature).is_some());
        });
        assert_eq!(cache.len(), 0);

        keys.par_iter_mut().enumerate().for_each(|(i, key)| {
            if fastrand::usize(..3) != 0 {
                let payload = (N + i) as u64;
                cache.put(key.signature, payload, 1, 0).expect("cache was emptied");
                key.expected = Some(payload);
            }
        });

        keys.par_iter_mut().enumerate().for_each(|(i, key)| {
            if fastrand::usize(..3) == 0 {
                cache.delete(key.signature);
                key.expected = None;
            } else {
                let payload = (2 * N + i) as u64;
                cache.replace(key.signature, payload, 1, 0).expect("fits");
                key.expected = Some(payload);
            }
        });

        let live = keys.iter().filter(|key| key.expected.is_some()).count();
        assert_eq!(cache.len(), live);

        keys.par_iter().for_each(|key| {
            let found = cache.get(key.signature).map(Entry::into_payload);
            assert_eq!(found, key.expected);
        });
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_hammer_conserves_entries() {
        let graveyard = Graveyard::default();
        let cache = LruCache::with_config(
            CacheConfig::new(64 * 8).with_granularity(8),
            graveyard.destructor(),
        );
        let threads = 8;
        let ops = 5_000;
        let barrier = Barrier::new(threads);
        let accepted = AtomicUsize::new(0);
        let taken = AtomicUsize::new(0);

        thread::scope(|s| {
            for t in 0..threads {
                let (cache, barrier, accepted, taken) = (&cache, &barrier, &accepted, &taken);
                s.spawn(move || {
                    barrier.wait();
                    for i in 0..ops {
                        let signature = (t * 1_000 + i % 200) as u64 + 1;
                        if cache.put(signature, signature, 1 + i % 16, 0).is_ok() {
                            accepted.fetch_add(1, Relaxed);
                        }
                        if i % 3 == 0 && cache.get(signature).is_some() {
                            taken.fetch_add(1, Relaxed);
                        }
                        if i % 7 == 0 && cache.delete(signature).is_some() {
                            taken.fetch_add(1, Relaxed);
                        }
                    }
                });
            }
        });

        let evicted = graveyard.calls();
        let resident = cache.len();
        assert_eq!(
            accepted.load(Relaxed),
            taken.load(Relaxed) + evicted + resident,
            "every accepted entry is taken, evicted or resident"
        );
        assert!(cache.occupied_bytes() <= cache.budget_bytes());
        assert_eq!(cache.metrics().eviction_count() as usize, evicted);

        assert_eq!(cache.close(), resident);
        assert_eq!(graveyard.calls(), evicted + resident);
    }

    #[test]
    fn test_concurrent_evictors_stop_at_budget() {
        const BUDGET: usize = 500;
        let graveyard = Graveyard::default();
        let cache = LruCache::with_config(
            CacheConfig::new(BUDGET).with_granularity(16),
            graveyard.destructor(),
        );
        let threads = 8;
        let ops = 2_000;
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for t in 0..threads {
                let (cache, barrier) = (&cache, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    for i in 0..ops {
                        let signature = (t * ops + i) as u64 + 1;
                        cache.put(signature, signature, 1, 0).expect("fresh key");
                    }
                });
            }
        });

        assert_eq!(cache.occupied_bytes(), BUDGET);
        assert_eq!(cache.len(), BUDGET);
        assert_eq!(graveyard.calls(), threads * ops - BUDGET);
    }
}
