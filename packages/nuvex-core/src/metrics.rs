//! Per-layer counters and the derived metrics snapshot returned by
//! `getMetrics`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::ema::Ema;
use crate::layer::{LayerSelector, LayerTag};

/// Raw, monotonically increasing counters for a single layer.
///
/// All fields are atomics because they are updated from whichever task
/// happens to be serving a given request; there is no single owning task.
#[derive(Debug, Default)]
pub struct LayerCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub errors: AtomicU64,
}

impl LayerCounters {
    fn snapshot(&self) -> LayerCountersSnapshot {
        LayerCountersSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a layer's counters, safe to hand out of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerCountersSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl LayerCountersSnapshot {
    fn merge(&self, other: &LayerCountersSnapshot) -> LayerCountersSnapshot {
        LayerCountersSnapshot {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            sets: self.sets + other.sets,
            deletes: self.deletes + other.deletes,
            errors: self.errors + other.errors,
        }
    }

    fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Full counter set for the engine: one [`LayerCounters`] per tier, plus a
/// shared response-time EMA and L1 size gauge.
#[derive(Debug)]
pub struct MetricsCore {
    memory: LayerCounters,
    redis: LayerCounters,
    postgres: LayerCounters,
    response_time_ms: parking_lot::Mutex<Ema>,
    l1_size: AtomicI64,
}

impl Default for MetricsCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: LayerCounters::default(),
            redis: LayerCounters::default(),
            postgres: LayerCounters::default(),
            response_time_ms: parking_lot::Mutex::new(Ema::new()),
            l1_size: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn counters(&self, layer: LayerTag) -> &LayerCounters {
        match layer {
            LayerTag::Memory => &self.memory,
            LayerTag::Redis => &self.redis,
            LayerTag::Postgres => &self.postgres,
        }
    }

    pub fn record_response_time(&self, sample_ms: f64) {
        self.response_time_ms.lock().observe(sample_ms);
    }

    pub fn set_l1_size(&self, size: usize) {
        self.l1_size.store(size as i64, Ordering::Relaxed);
    }

    /// Builds the snapshot for the requested selector, including derived
    /// `cache_hit_ratio` restricted to the selected layers and, for L1, the
    /// current entry count.
    #[must_use]
    pub fn snapshot(&self, selector: &LayerSelector) -> MetricsSnapshot {
        let tags = selector.resolve();
        let mut per_layer = HashMap::new();
        let mut combined = LayerCountersSnapshot::default();
        for tag in &tags {
            let snap = self.counters(*tag).snapshot();
            combined = combined.merge(&snap);
            per_layer.insert(*tag, snap);
        }
        MetricsSnapshot {
            per_layer,
            cache_hit_ratio: combined.hit_ratio(),
            response_time_ms: self.response_time_ms.lock().get(),
            l1_size: if tags.contains(&LayerTag::Memory) {
                Some(self.l1_size.load(Ordering::Relaxed).max(0) as u64)
            } else {
                None
            },
        }
    }

    /// Zeroes every counter. Does not reset the response-time EMA or the L1
    /// size gauge, both of which reflect current state rather than a tally.
    pub fn reset(&self) {
        self.memory.reset();
        self.redis.reset();
        self.postgres.reset();
    }
}

/// Result of `getMetrics`: per-layer counters for the requested selector plus
/// derived aggregates.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub per_layer: HashMap<LayerTag, LayerCountersSnapshot>,
    pub cache_hit_ratio: f64,
    pub response_time_ms: f64,
    pub l1_size: Option<u64>,
}
