//! L1: in-process LRU memory cache.
//!
//! Backed by the `lru` crate rather than `dashmap` (used elsewhere in this
//! workspace) because eviction must follow an exact least-recently-used
//! order: a dashmap or a probabilistic cache like moka cannot guarantee the
//! evicted set is a prefix of the access order.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use nuvex_core::{LayerTag, MetricsCore};
use parking_lot::Mutex;
use serde_json::Value;

use super::glob::glob_to_regex;
use super::traits::{EntryMeta, Layer, StoredEntry};

struct Cell {
    value: Value,
    meta: EntryMeta,
    expires_at: Option<Instant>,
}

impl Cell {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// L1 memory layer. A single mutex guards the whole cache: every operation,
/// including reads, must be able to reorder the LRU list.
pub struct MemoryLayer {
    cache: Mutex<LruCache<String, Cell>>,
    default_ttl: Duration,
    metrics: Arc<MetricsCore>,
}

impl MemoryLayer {
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration, metrics: Arc<MetricsCore>) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).expect("max_size.max(1) is never zero");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            default_ttl,
            metrics,
        }
    }

    /// Current number of live (possibly-expired-but-not-yet-swept) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps every expired entry. Called by the engine's cleanup scheduler.
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> u64 {
        let now = Instant::now();
        let mut cache = self.cache.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, cell)| cell.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        self.metrics.set_l1_size(cache.len());
        expired.len() as u64
    }

    /// Best-effort key enumeration used when no L3 is configured: a
    /// snapshot of whatever currently lives in L1, optionally filtered by a
    /// `*`/`?` glob. Unlike L3's `keys_matching`, this can miss keys that
    /// were never warmed into L1 or have since been evicted.
    #[must_use]
    pub fn snapshot_keys(&self, pattern: Option<&str>) -> Vec<String> {
        let now = Instant::now();
        let re = pattern.map(glob_to_regex);
        let cache = self.cache.lock();
        let mut keys: Vec<String> = cache
            .iter()
            .filter(|(_, cell)| !cell.is_expired(now))
            .filter(|(k, _)| re.as_ref().is_none_or(|re| re.is_match(k)))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Layer for MemoryLayer {
    fn tag(&self) -> LayerTag {
        LayerTag::Memory
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.get_with_meta(key).await?.map(|entry| entry.value))
    }

    async fn get_with_meta(&self, key: &str) -> anyhow::Result<Option<StoredEntry>> {
        let now = Instant::now();
        let mut cache = self.cache.lock();
        let hit = match cache.get(key) {
            Some(cell) if cell.is_expired(now) => {
                cache.pop(key);
                None
            }
            Some(cell) => Some(StoredEntry {
                value: cell.value.clone(),
                meta: cell.meta,
            }),
            None => None,
        };
        let counters = self.metrics.counters(LayerTag::Memory);
        if hit.is_some() {
            counters.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        } else {
            counters.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut cache = self.cache.lock();
        let version = cache
            .peek(key)
            .map_or(1, |cell| cell.meta.version.saturating_add(1));
        cache.put(
            key.to_string(),
            Cell {
                value: value.clone(),
                meta: EntryMeta {
                    created_at: Utc::now(),
                    version,
                },
                expires_at: if ttl.is_zero() {
                    None
                } else {
                    Some(Instant::now() + ttl)
                },
            },
        );
        self.metrics.set_l1_size(cache.len());
        self.metrics
            .counters(LayerTag::Memory)
            .sets
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> anyhow::Result<bool> {
        let already_present = {
            let cache = self.cache.lock();
            cache.peek(key).is_some()
        };
        if already_present {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut cache = self.cache.lock();
        let removed = cache.pop(key).is_some();
        if removed {
            self.metrics.set_l1_size(cache.len());
            self.metrics
                .counters(LayerTag::Memory)
                .deletes
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let cache = self.cache.lock();
        Ok(cache.peek(key).is_some_and(|cell| !cell.is_expired(now)))
    }

    async fn clear(&self, pattern: Option<&str>) -> anyhow::Result<u64> {
        let mut cache = self.cache.lock();
        let removed = match pattern {
            None => {
                let count = cache.len();
                cache.clear();
                count
            }
            Some(pattern) => {
                let re = glob_to_regex(pattern);
                let matching: Vec<String> = cache
                    .iter()
                    .filter(|(k, _)| re.is_match(k))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &matching {
                    cache.pop(key);
                }
                matching.len()
            }
        };
        self.metrics.set_l1_size(cache.len());
        Ok(removed as u64)
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut cache = self.cache.lock();
        let now = Instant::now();
        let current = match cache.get(key) {
            Some(cell) if !cell.is_expired(now) => cell
                .value
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("value at `{key}` is not an integer"))?,
            _ => 0,
        };
        let new_value = current + delta;
        let version = cache
            .peek(key)
            .map_or(1, |cell| cell.meta.version.saturating_add(1));
        cache.put(
            key.to_string(),
            Cell {
                value: Value::from(new_value),
                meta: EntryMeta {
                    created_at: Utc::now(),
                    version,
                },
                expires_at: if ttl.is_zero() {
                    None
                } else {
                    Some(Instant::now() + ttl)
                },
            },
        );
        self.metrics.set_l1_size(cache.len());
        Ok(new_value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut cache = self.cache.lock();
        match cache.get_mut(key) {
            Some(cell) => {
                cell.expires_at = if ttl.is_zero() {
                    None
                } else {
                    Some(Instant::now() + ttl)
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use nuvex_core::LayerSelector;

    use super::*;

    fn layer(max_size: usize) -> MemoryLayer {
        MemoryLayer::new(max_size, Duration::from_secs(60), Arc::new(MetricsCore::new()))
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let l1 = layer(10);
        l1.set("a", &Value::from(1), None).await.unwrap();
        assert_eq!(l1.get("a").await.unwrap(), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn lru_eviction_order_matches_access_pattern() {
        // Scenario from the design: maxSize=3, set a,b,c, get(a), set(d) -> {a,c,d}, b evicted.
        let l1 = layer(3);
        l1.set("a", &Value::from(1), None).await.unwrap();
        l1.set("b", &Value::from(2), None).await.unwrap();
        l1.set("c", &Value::from(3), None).await.unwrap();
        l1.get("a").await.unwrap();
        l1.set("d", &Value::from(4), None).await.unwrap();

        assert!(l1.exists("a").await.unwrap());
        assert!(!l1.exists("b").await.unwrap());
        assert!(l1.exists("c").await.unwrap());
        assert!(l1.exists("d").await.unwrap());
        assert_eq!(l1.len(), 3);
    }

    #[tokio::test]
    async fn ttl_expiry_hides_value_and_sweep_removes_it() {
        let l1 = MemoryLayer::new(10, Duration::from_millis(20), Arc::new(MetricsCore::new()));
        l1.set("t", &Value::from(1), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(l1.get("t").await.unwrap(), None);
        assert_eq!(l1.sweep_expired(), 0, "get() already evicted it");
        assert!(l1.is_empty());
    }

    #[tokio::test]
    async fn set_if_not_exists_only_writes_once() {
        let l1 = layer(10);
        assert!(l1.set_if_not_exists("k", &Value::from(1), None).await.unwrap());
        assert!(!l1.set_if_not_exists("k", &Value::from(2), None).await.unwrap());
        assert_eq!(l1.get("k").await.unwrap(), Some(Value::from(1)));
    }

    #[tokio::test]
    async fn clear_with_pattern_only_removes_matches() {
        let l1 = layer(10);
        l1.set("user:1", &Value::from(1), None).await.unwrap();
        l1.set("user:2", &Value::from(2), None).await.unwrap();
        l1.set("order:1", &Value::from(3), None).await.unwrap();

        let removed = l1.clear(Some("user:*")).await.unwrap();
        assert_eq!(removed, 2);
        assert!(l1.exists("order:1").await.unwrap());
    }

    #[tokio::test]
    async fn increment_on_absent_key_starts_from_zero() {
        let l1 = layer(10);
        assert_eq!(l1.increment("c", 1, None).await.unwrap(), 1);
        assert_eq!(l1.increment("c", 1, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn metrics_track_hits_and_misses() {
        let l1 = layer(10);
        l1.get("missing").await.unwrap();
        l1.set("k", &Value::from(1), None).await.unwrap();
        l1.get("k").await.unwrap();

        let snap = l1.metrics.snapshot(&LayerSelector::One(LayerTag::Memory));
        let counters = snap.per_layer[&LayerTag::Memory];
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.hits, 1);
        assert_eq!(counters.sets, 1);
    }
}
