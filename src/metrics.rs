//! # Sharded cache telemetry
//!
//! Counters are split across shards picked by a per-thread id, and every
//! shard lives on its own cache line, so workers hammering the same cache do
//! not fight over one counter. Reads aggregate all shards into a
//! [`MetricsSnapshot`].
use crossbeam::utils::CachePadded;
use hdrhistogram::Histogram;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicU64, AtomicUsize};

pub const DEFAULT_SHARDS: usize = 4;

pub const DEFAULT_LATENCY_SAMPLES: usize = 256;

/// Highest latency, in nanoseconds, the snapshot histogram tracks.
const MAX_TRACKED_LATENCY: u64 = 60_000_000_000;

/// Low 48 bits of a ring slot hold the sample, the high 16 bits its lap.
const SAMPLE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Relaxed);
}

#[inline]
fn shard_index(shards: usize) -> usize {
    THREAD_ID.with(|id| *id) & (shards - 1)
}

/// Shape of the [`Metrics`] collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    shards: usize,
    latency_samples: usize,
}

impl MetricsConfig {
    /// Both values are rounded up to the next power of two.
    #[inline]
    pub fn new(shards: usize, latency_samples: usize) -> Self {
        Self {
            shards: shards.max(1).next_power_of_two(),
            latency_samples: latency_samples.max(1).next_power_of_two(),
        }
    }

    #[inline]
    pub fn shards(&self) -> usize {
        self.shards
    }

    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.latency_samples
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS, DEFAULT_LATENCY_SAMPLES)
    }
}

/// Event sink owned by a cache.
///
/// All recording methods are wait-free `Relaxed` increments on the calling
/// thread's shard. [`Metrics::snapshot`] walks every shard and is meant for
/// reporting, not for the hot path.
#[derive(Debug)]
pub struct Metrics {
    shards: Vec<CachePadded<Counters>>,
    config: MetricsConfig,
}

impl Metrics {
    pub fn new(config: MetricsConfig) -> Self {
        let shards = (0..config.shards)
            .map(|_| CachePadded::new(Counters::new(config.latency_samples)))
            .collect();

        Self { shards, config }
    }

    #[inline]
    fn local(&self) -> &Counters {
        &self.shards[shard_index(self.config.shards)]
    }

    /// A `get` found its signature.
    #[inline]
    pub fn record_hit(&self) {
        self.local().hits.fetch_add(1, Relaxed);
    }

    /// A `get` came back empty.
    #[inline]
    pub fn record_miss(&self) {
        self.local().misses.fetch_add(1, Relaxed);
    }

    /// An entry was destroyed to make room.
    #[inline]
    pub fn record_eviction(&self) {
        self.local().evictions.fetch_add(1, Relaxed);
    }

    /// A `put` was refused and its payload returned.
    #[inline]
    pub fn record_rejection(&self) {
        self.local().rejections.fetch_add(1, Relaxed);
    }

    /// Records an operation latency in nanoseconds. Zero is dropped.
    #[inline]
    pub fn record_latency(&self, nanos: u64) {
        self.local().latency.record(nanos);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::empty();

        for counters in &self.shards {
            snapshot.hit_count = snapshot.hit_count.saturating_add(counters.hits.load(Relaxed));
            snapshot.miss_count = snapshot.miss_count.saturating_add(counters.misses.load(Relaxed));
            snapshot.eviction_count = snapshot
                .eviction_count
                .saturating_add(counters.evictions.load(Relaxed));
            snapshot.rejection_count = snapshot
                .rejection_count
                .saturating_add(counters.rejections.load(Relaxed));

            if let Some(histogram) = snapshot.latency_histogram.as_mut() {
                counters.latency.drain_into(histogram);
            }
        }

        snapshot
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

/// Latency quantiles reported by [`MetricsSnapshot::latency`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyPercentile {
    P50,
    P90,
    P99,
    P999,
}

impl LatencyPercentile {
    fn as_quantile(self) -> f64 {
        match self {
            Self::P50 => 0.50,
            Self::P90 => 0.90,
            Self::P99 => 0.99,
            Self::P999 => 0.999,
        }
    }
}

/// Point-in-time aggregate of a [`Metrics`] collector.
///
/// Shards are read one after another without a global lock, so the counts
/// may straddle concurrent updates.
#[derive(Debug)]
pub struct MetricsSnapshot {
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
    rejection_count: u64,
    latency_histogram: Option<Histogram<u64>>,
}

impl MetricsSnapshot {
    fn empty() -> Self {
        Self {
            hit_count: 0,
            miss_count: 0,
            eviction_count: 0,
            rejection_count: 0,
            latency_histogram: Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY, 2).ok(),
        }
    }

    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    #[inline]
    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    #[inline]
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    #[inline]
    pub fn rejection_count(&self) -> u64 {
        self.rejection_count
    }

    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    /// `misses / (hits + misses)`, or `0.0` before any lookup.
    pub fn miss_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.miss_count as f64 / total as f64
        }
    }

    /// Latency in nanoseconds at `percentile`, `0` when nothing was sampled.
    pub fn latency(&self, percentile: LatencyPercentile) -> u64 {
        self.latency_histogram
            .as_ref()
            .map_or(0, |histogram| histogram.value_at_quantile(percentile.as_quantile()))
    }
}

impl From<&Metrics> for MetricsSnapshot {
    fn from(metrics: &Metrics) -> Self {
        metrics.snapshot()
    }
}

#[derive(Debug)]
struct Counters {
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
    rejections: CachePadded<AtomicU64>,
    latency: LatencyRing,
}

impl Counters {
    fn new(latency_samples: usize) -> Self {
        Self {
            hits: CachePadded::new(AtomicU64::new(0)),
            misses: CachePadded::new(AtomicU64::new(0)),
            evictions: CachePadded::new(AtomicU64::new(0)),
            rejections: CachePadded::new(AtomicU64::new(0)),
            latency: LatencyRing::new(latency_samples),
        }
    }
}

/// Lossy ring of the most recent latency samples.
///
/// Writers claim a slot with one `fetch_add` on the cursor and overwrite
/// whatever was there. Each slot is tagged with the lap it was written in so
/// that a snapshot only reads samples from the cursor's current lap.
#[derive(Debug)]
struct LatencyRing {
    slots: Box<[AtomicU64]>,
    cursor: CachePadded<AtomicUsize>,
    mask: usize,
}

impl LatencyRing {
    fn new(capacity: usize) -> Self {
        let len = capacity.max(1).next_power_of_two();

        Self {
            slots: (0..len).map(|_| AtomicU64::new(0)).collect(),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            mask: len - 1,
        }
    }

    #[inline]
    fn lap(&self, position: usize) -> u64 {
        (position / self.slots.len()) as u64
    }

    #[inline]
    fn record(&self, value: u64) {
        if value == 0 {
            return;
        }

        let position = self.cursor.fetch_add(1, Relaxed);
        let packed = (self.lap(position) << 48) | (value & SAMPLE_MASK);
        self.slots[position & self.mask].store(packed, Relaxed);
    }

    fn drain_into(&self, histogram: &mut Histogram<u64>) {
        let lap = self.lap(self.cursor.load(Relaxed)) & 0xFFFF;

        for slot in self.slots.iter() {
            let packed = slot.load(Relaxed);
            let value = packed & SAMPLE_MASK;

            if value > 0 && packed >> 48 == lap {
                let _ = histogram.record(value);
            }
        }
    }
}
