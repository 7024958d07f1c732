//! Orchestrator composing L1/L2/L3 into the single-key-space public surface.
//!
//! Mirrors the teacher's `DefaultRecordStore`: one struct holding three named
//! layer fields (L2/L3 optional) rather than dispatching through a
//! homogeneous collection, because each tier's semantics differ (L3
//! authoritative, the other two caches).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nuvex_core::{
    EngineConfig, EngineError, EngineResult, GetOptions, LayerSelector, LayerTag, MetricsCore,
    MetricsSnapshot, PostgresConfig, QueryOptions, SetOptions, SortKey, TargetOptions,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::layers::{CacheLayer, EntryMeta, Layer, MemoryLayer, StoreLayer};

/// One entry as returned by [`StorageEngine::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryItem {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

/// Result of [`StorageEngine::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub items: Vec<QueryItem>,
    pub has_more: bool,
}

/// Result of one entry in a batch operation.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub key: String,
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ConnectionState {
    Constructed = 0,
    Connected = 2,
    Disconnected = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            2 => Self::Connected,
            4 => Self::Disconnected,
            _ => Self::Constructed,
        }
    }
}

/// Composes L1/L2/L3 into the cascade-read, L3-first-write engine.
///
/// Construct with [`Self::build`] (connects L2/L3 from configuration) or
/// [`Self::memory_only`] (no cache/store network dependencies, used by the
/// quickstart demo and by tests that do not need a fake L2/L3).
pub struct StorageEngine {
    l1: MemoryLayer,
    l2: Option<Arc<dyn Layer>>,
    l3: Option<Arc<dyn Layer>>,
    metrics: Arc<MetricsCore>,
    state: AtomicU8,
    cleanup_interval: Duration,
    cleanup_task: StdMutex<Option<JoinHandle<()>>>,
    l3_pool_owned: bool,
}

impl StorageEngine {
    /// Builds and connects an engine from configuration: connects L2 if
    /// configured (dropping it and logging on failure), connects L3 if
    /// configured (aborting construction on failure), then starts the
    /// cleanup scheduler.
    ///
    /// # Errors
    /// Returns [`EngineError::L3Write`] if a configured L3 fails to connect.
    pub async fn build(config: &EngineConfig) -> EngineResult<Arc<Self>> {
        let metrics = Arc::new(MetricsCore::new());
        let l1 = MemoryLayer::new(config.memory.max_size, config.memory.ttl, Arc::clone(&metrics));

        let l2: Option<Arc<dyn Layer>> = match config.redis.url.as_deref() {
            Some(url) => match CacheLayer::connect(url, config.redis.ttl).await {
                Ok(cache) => {
                    info!("L2 (redis) connected");
                    Some(Arc::new(cache))
                }
                Err(err) => {
                    warn!(error = %err, "L2 (redis) connect failed; proceeding without it");
                    None
                }
            },
            None => None,
        };

        let l3: Option<Arc<dyn Layer>> = if config.postgres.host.is_empty() {
            None
        } else {
            match StoreLayer::connect(&config.postgres).await {
                Ok(store) => {
                    info!("L3 (postgres) connected");
                    Some(Arc::new(store))
                }
                Err(err) => return Err(EngineError::L3Write(err)),
            }
        };

        let engine = Arc::new(Self {
            l1,
            l2,
            l3,
            metrics,
            state: AtomicU8::new(ConnectionState::Connected as u8),
            cleanup_interval: config.memory.cleanup_cadence(),
            cleanup_task: StdMutex::new(None),
            l3_pool_owned: true,
        });
        engine.spawn_cleanup_task();
        Ok(engine)
    }

    /// Wraps an already-built pool for L3, bypassing `connect`. The engine
    /// never calls `.close()` on a pool supplied this way (caller-owned).
    #[must_use]
    pub fn with_pool(l1_config: &nuvex_core::MemoryConfig, pool: sqlx::PgPool, schema: &PostgresConfig) -> Arc<Self> {
        let metrics = Arc::new(MetricsCore::new());
        let l1 = MemoryLayer::new(l1_config.max_size, l1_config.ttl, Arc::clone(&metrics));
        let store: Arc<dyn Layer> = Arc::new(StoreLayer::with_pool(pool, schema));
        let engine = Arc::new(Self {
            l1,
            l2: None,
            l3: Some(store),
            metrics,
            state: AtomicU8::new(ConnectionState::Connected as u8),
            cleanup_interval: l1_config.cleanup_cadence(),
            cleanup_task: StdMutex::new(None),
            l3_pool_owned: false,
        });
        engine.spawn_cleanup_task();
        engine
    }

    /// An L1-only engine: no L2/L3, nothing to connect. Used by the
    /// quickstart demo and by engine-level tests against fakes.
    #[must_use]
    pub fn memory_only(config: &nuvex_core::MemoryConfig) -> Arc<Self> {
        let metrics = Arc::new(MetricsCore::new());
        let l1 = MemoryLayer::new(config.max_size, config.ttl, Arc::clone(&metrics));
        let engine = Arc::new(Self {
            l1,
            l2: None,
            l3: None,
            metrics,
            state: AtomicU8::new(ConnectionState::Connected as u8),
            cleanup_interval: config.cleanup_cadence(),
            cleanup_task: StdMutex::new(None),
            l3_pool_owned: false,
        });
        engine.spawn_cleanup_task();
        engine
    }

    /// Assembles an engine from an L1 config plus already-constructed L2/L3
    /// trait objects, skipping `build`'s network connects entirely. Used to
    /// wire in `FakeLayer` doubles so engine-level tests can exercise the
    /// cascade and fan-out logic deterministically.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn with_fakes(
        config: &nuvex_core::MemoryConfig,
        l2: Option<Arc<dyn Layer>>,
        l3: Option<Arc<dyn Layer>>,
    ) -> Arc<Self> {
        let metrics = Arc::new(MetricsCore::new());
        let l1 = MemoryLayer::new(config.max_size, config.ttl, Arc::clone(&metrics));
        let engine = Arc::new(Self {
            l1,
            l2,
            l3,
            metrics,
            state: AtomicU8::new(ConnectionState::Connected as u8),
            cleanup_interval: config.cleanup_cadence(),
            cleanup_task: StdMutex::new(None),
            l3_pool_owned: false,
        });
        engine.spawn_cleanup_task();
        engine
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn spawn_cleanup_task(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let interval = self.cleanup_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if engine.state() != ConnectionState::Connected {
                    break;
                }
                let removed = engine.l1.sweep_expired();
                if removed > 0 {
                    debug!(removed, "L1 cleanup swept expired entries");
                }
            }
        });
        *self.cleanup_task.lock().unwrap_or_else(|err| err.into_inner()) = Some(handle);
    }

    /// `Connected -> Disconnecting -> Disconnected`: stops the cleanup timer
    /// and drops the L3 pool if the engine owns it.
    pub async fn disconnect(&self) {
        self.state.store(ConnectionState::Disconnected as u8, Ordering::Release);
        if let Some(handle) = self.cleanup_task.lock().unwrap_or_else(|err| err.into_inner()).take() {
            handle.abort();
        }
        if self.l3_pool_owned {
            if let Some(l3) = &self.l3 {
                l3.close().await;
            }
        }
        info!("storage engine disconnected");
    }

    fn require_connected(&self) -> EngineResult<()> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(EngineError::NotConnected)
        }
    }

    /// Fetches from a single layer, recording hits/misses for L2/L3 on
    /// `self.metrics` — L1 already self-reports via the `MetricsCore` handle
    /// it was constructed with, so counting it again here would double it.
    async fn layer_get(&self, tag: LayerTag, key: &str) -> Option<Value> {
        let result = match tag {
            LayerTag::Memory => self.l1.get(key).await,
            LayerTag::Redis => match &self.l2 {
                Some(l2) => l2.get(key).await,
                None => return None,
            },
            LayerTag::Postgres => match &self.l3 {
                Some(l3) => l3.get(key).await,
                None => return None,
            },
        };
        match result {
            Ok(value) => {
                if tag != LayerTag::Memory {
                    let counters = self.metrics.counters(tag);
                    if value.is_some() {
                        counters.hits.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.misses.fetch_add(1, Ordering::Relaxed);
                    }
                }
                value
            }
            Err(err) => {
                warn!(error = %err, key, layer = tag.as_str(), "layer read failed; treated as a miss");
                if tag != LayerTag::Memory {
                    self.metrics.counters(tag).errors.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    /// Writes to a single layer, recording the set (or error) for L2/L3 on
    /// `self.metrics`. L1 self-reports the same way `layer_get` does.
    async fn layer_set(&self, tag: LayerTag, key: &str, value: &Value, ttl: Option<Duration>) -> bool {
        let result = match tag {
            LayerTag::Memory => self.l1.set(key, value, ttl).await,
            LayerTag::Redis => match &self.l2 {
                Some(l2) => l2.set(key, value, ttl).await,
                None => return false,
            },
            LayerTag::Postgres => match &self.l3 {
                Some(l3) => l3.set(key, value, ttl).await,
                None => return false,
            },
        };
        if tag != LayerTag::Memory {
            let counters = self.metrics.counters(tag);
            match &result {
                Ok(()) => {
                    counters.sets.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(error = %err, key, layer = tag.as_str(), "layer write failed");
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        result.is_ok()
    }

    async fn layer_set_if_not_exists(&self, tag: LayerTag, key: &str, value: &Value, ttl: Option<Duration>) -> Option<bool> {
        let result = match tag {
            LayerTag::Memory => self.l1.set_if_not_exists(key, value, ttl).await,
            LayerTag::Redis => match &self.l2 {
                Some(l2) => l2.set_if_not_exists(key, value, ttl).await,
                None => return None,
            },
            LayerTag::Postgres => match &self.l3 {
                Some(l3) => l3.set_if_not_exists(key, value, ttl).await,
                None => return None,
            },
        };
        match result {
            Ok(written) => Some(written),
            Err(err) => {
                warn!(error = %err, key, layer = tag.as_str(), "set_if_not_exists failed");
                None
            }
        }
    }

    async fn layer_delete(&self, tag: LayerTag, key: &str) -> bool {
        let result = match tag {
            LayerTag::Memory => self.l1.delete(key).await,
            LayerTag::Redis => match &self.l2 {
                Some(l2) => l2.delete(key).await,
                None => return false,
            },
            LayerTag::Postgres => match &self.l3 {
                Some(l3) => l3.delete(key).await,
                None => return false,
            },
        };
        let removed = result.unwrap_or(false);
        if tag != LayerTag::Memory && removed {
            self.metrics.counters(tag).deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    async fn layer_exists(&self, tag: LayerTag, key: &str) -> bool {
        let result = match tag {
            LayerTag::Memory => self.l1.exists(key).await,
            LayerTag::Redis => match &self.l2 {
                Some(l2) => l2.exists(key).await,
                None => return false,
            },
            LayerTag::Postgres => match &self.l3 {
                Some(l3) => l3.exists(key).await,
                None => return false,
            },
        };
        result.unwrap_or(false)
    }

    async fn layer_ping(&self, tag: LayerTag) -> bool {
        match tag {
            LayerTag::Memory => self.l1.ping().await,
            LayerTag::Redis => match &self.l2 {
                Some(l2) => l2.ping().await,
                None => false,
            },
            LayerTag::Postgres => match &self.l3 {
                Some(l3) => l3.ping().await,
                None => false,
            },
        }
    }

    /// Cascade read: L1 -> L2 -> L3, warming higher layers on a deeper hit.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn get(&self, key: &str, options: &GetOptions) -> EngineResult<Option<Value>> {
        self.require_connected()?;
        let start = Instant::now();
        let result = self.get_inner(key, options).await;
        self.metrics.record_response_time(start.elapsed().as_secs_f64() * 1000.0);
        Ok(result)
    }

    async fn get_inner(&self, key: &str, options: &GetOptions) -> Option<Value> {
        if options.skip_cache {
            return match &self.l3 {
                Some(_) => self.layer_get(LayerTag::Postgres, key).await,
                None => None,
            };
        }

        if let Some(tag) = options.layer {
            return self.layer_get(tag, key).await;
        }

        if let Some(value) = self.layer_get(LayerTag::Memory, key).await {
            return Some(value);
        }

        if self.l2.is_some() {
            if let Some(value) = self.layer_get(LayerTag::Redis, key).await {
                let _ = self.layer_set(LayerTag::Memory, key, &value, options.ttl).await;
                return Some(value);
            }
        }

        if self.l3.is_some() {
            if let Some(value) = self.layer_get(LayerTag::Postgres, key).await {
                let l1_warm = self.layer_set(LayerTag::Memory, key, &value, options.ttl);
                let l2_warm = self.layer_set(LayerTag::Redis, key, &value, options.ttl);
                let _ = tokio::join!(l1_warm, l2_warm);
                return Some(value);
            }
        }

        None
    }

    /// L3-first write: L3 acceptance gates whether cache fan-out happens at
    /// all, preserving the source-of-truth invariant. With no L3 configured,
    /// the cache itself becomes the source of truth.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn set(&self, key: &str, value: &Value, options: &SetOptions) -> EngineResult<bool> {
        self.require_connected()?;

        if let Some(tag) = options.layer {
            return Ok(self.layer_set(tag, key, value, options.ttl).await);
        }

        if let Some(l3) = &self.l3 {
            if let Err(err) = l3.set(key, value, options.ttl).await {
                warn!(error = %err, key, "L3 write failed; no cache fan-out attempted");
                self.metrics.counters(LayerTag::Postgres).errors.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
            self.metrics.counters(LayerTag::Postgres).sets.fetch_add(1, Ordering::Relaxed);
        } else if self.l2.is_none() {
            let _ = self.l1.set(key, value, options.ttl).await;
            return Ok(true);
        }

        let l1_fanout = self.l1.set(key, value, options.ttl);
        let l2_fanout = async {
            if let Some(l2) = &self.l2 {
                match l2.set(key, value, options.ttl).await {
                    Ok(()) => self.metrics.counters(LayerTag::Redis).sets.fetch_add(1, Ordering::Relaxed),
                    Err(err) => {
                        warn!(error = %err, key, "L2 fan-out failed");
                        self.metrics.counters(LayerTag::Redis).errors.fetch_add(1, Ordering::Relaxed)
                    }
                };
            }
        };
        let _ = tokio::join!(l1_fanout, l2_fanout);
        Ok(true)
    }

    /// Best-effort delete across all three layers, or a single targeted one.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn delete(&self, key: &str, options: &TargetOptions) -> EngineResult<bool> {
        self.require_connected()?;

        if let Some(tag) = options.layer {
            return Ok(self.layer_delete(tag, key).await);
        }

        let _ = tokio::join!(
            self.layer_delete(LayerTag::Memory, key),
            self.layer_delete(LayerTag::Redis, key),
            self.layer_delete(LayerTag::Postgres, key),
        );
        Ok(true)
    }

    /// Short-circuit `OR` across L1, L2, L3, or a single targeted layer.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn exists(&self, key: &str, options: &TargetOptions) -> EngineResult<bool> {
        self.require_connected()?;

        if let Some(tag) = options.layer {
            return Ok(self.layer_exists(tag, key).await);
        }

        if self.layer_exists(LayerTag::Memory, key).await {
            return Ok(true);
        }
        if self.l2.is_some() && self.layer_exists(LayerTag::Redis, key).await {
            return Ok(true);
        }
        if self.l3.is_some() && self.layer_exists(LayerTag::Postgres, key).await {
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes `key` only if it is absent, using the most authoritative
    /// present layer's native CAS primitive (L3 `INSERT ... ON CONFLICT DO
    /// NOTHING`, L2 `SET NX`, or L1's own mutex-guarded check-then-insert —
    /// each atomic within that one layer). The result is then fanned out as
    /// a plain `set` to the less-authoritative layers, same as `increment`.
    ///
    /// This is not a single atomic operation across all three layers: a
    /// concurrent writer targeting a *different* layer than the one this
    /// call lands on could still race. See the design notes on
    /// `setIfNotExists` for the accepted residual race.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn set_if_not_exists(&self, key: &str, value: &Value, options: &SetOptions) -> EngineResult<bool> {
        self.require_connected()?;

        if let Some(tag) = options.layer {
            return Ok(self.layer_set_if_not_exists(tag, key, value, options.ttl).await.unwrap_or(false));
        }

        let authoritative = if self.l3.is_some() {
            LayerTag::Postgres
        } else if self.l2.is_some() {
            LayerTag::Redis
        } else {
            LayerTag::Memory
        };

        let Some(written) = self.layer_set_if_not_exists(authoritative, key, value, options.ttl).await else {
            return Ok(false);
        };
        if !written {
            return Ok(false);
        }

        if authoritative != LayerTag::Memory {
            let _ = self.layer_set(LayerTag::Memory, key, value, options.ttl).await;
        }
        if authoritative == LayerTag::Postgres {
            let _ = self.layer_set(LayerTag::Redis, key, value, options.ttl).await;
        }
        Ok(true)
    }

    /// `get` followed by `set` with a fresh TTL. Returns `false` if `key`
    /// is absent.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn expire(&self, key: &str, ttl: Duration) -> EngineResult<bool> {
        self.require_connected()?;
        match self.get(key, &GetOptions::none()).await? {
            Some(value) => self.set(key, &value, &SetOptions::with_ttl(ttl)).await,
            None => Ok(false),
        }
    }

    /// Increment cascade: the most authoritative present layer (L3 > L2 >
    /// L1) performs the atomic increment; the resulting value is then
    /// written (not incremented) to every less-authoritative layer.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if not connected, or a layer
    /// error if the authoritative layer's increment itself fails.
    pub async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> EngineResult<i64> {
        self.require_connected()?;

        let (new_value, authoritative) = if let Some(l3) = &self.l3 {
            let v = l3.increment(key, delta, ttl).await.map_err(EngineError::L3Write)?;
            (v, LayerTag::Postgres)
        } else if let Some(l2) = &self.l2 {
            let v = l2.increment(key, delta, ttl).await.map_err(EngineError::L2Transient)?;
            (v, LayerTag::Redis)
        } else {
            let v = self.l1.increment(key, delta, ttl).await.map_err(EngineError::L1Internal)?;
            (v, LayerTag::Memory)
        };

        let value = Value::from(new_value);
        if authoritative != LayerTag::Memory {
            let _ = self.layer_set(LayerTag::Memory, key, &value, ttl).await;
        }
        if authoritative == LayerTag::Postgres {
            let _ = self.layer_set(LayerTag::Redis, key, &value, ttl).await;
        }
        Ok(new_value)
    }

    /// Sequential batch get; a failed entry does not abort the batch.
    pub async fn get_batch(&self, keys: &[String], options: &GetOptions) -> Vec<BatchOutcome<Value>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(key, options).await {
                Ok(value) => out.push(BatchOutcome { key: key.clone(), success: true, value, error: None }),
                Err(err) => out.push(BatchOutcome { key: key.clone(), success: false, value: None, error: Some(err.to_string()) }),
            }
        }
        out
    }

    /// Sequential batch set; a failed entry does not abort the batch.
    pub async fn set_batch(&self, entries: &[(String, Value)], options: &SetOptions) -> Vec<BatchOutcome<bool>> {
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match self.set(key, value, options).await {
                Ok(success) => out.push(BatchOutcome { key: key.clone(), success, value: Some(success), error: None }),
                Err(err) => out.push(BatchOutcome { key: key.clone(), success: false, value: None, error: Some(err.to_string()) }),
            }
        }
        out
    }

    /// Sequential batch delete; a failed entry does not abort the batch.
    pub async fn delete_batch(&self, keys: &[String], options: &TargetOptions) -> Vec<BatchOutcome<bool>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.delete(key, options).await {
                Ok(success) => out.push(BatchOutcome { key: key.clone(), success, value: Some(success), error: None }),
                Err(err) => out.push(BatchOutcome { key: key.clone(), success: false, value: None, error: Some(err.to_string()) }),
            }
        }
        out
    }

    /// Enumerates keys matching `options.pattern`, fetches each via the
    /// cascade, sorts, and paginates. L3 is the enumeration source of
    /// truth; with no L3, enumeration falls back to a best-effort snapshot
    /// of L1's current contents and never touches L2 (full-keyspace scans
    /// of a real cache backend are an anti-pattern).
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn query(&self, options: &QueryOptions) -> EngineResult<QueryResult> {
        let keys = self.keys(options.pattern.as_deref()).await?;

        let mut items = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some((value, created_at)) = self.get_with_meta(key).await {
                items.push(QueryItem { key: key.clone(), value, created_at });
            }
        }

        match options.sort_by {
            SortKey::Key => items.sort_by(|a, b| a.key.cmp(&b.key)),
            SortKey::CreatedAt => items.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
        if options.descending {
            items.reverse();
        }

        let total = items.len();
        let page: Vec<QueryItem> = items.into_iter().skip(options.offset).take(options.limit).collect();
        let has_more = options.offset + page.len() < total;
        Ok(QueryResult { items: page, has_more })
    }

    async fn get_with_meta(&self, key: &str) -> Option<(Value, DateTime<Utc>)> {
        if let Some(l3) = &self.l3 {
            if let Ok(Some(entry)) = l3.get_with_meta(key).await {
                return Some((entry.value, entry.meta.created_at));
            }
        }
        if let Ok(Some(entry)) = self.l1.get_with_meta(key).await {
            return Some((entry.value, entry.meta.created_at));
        }
        None
    }

    /// Reads the current value via the cascade and writes it to `target`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn promote(&self, key: &str, target: LayerTag) -> EngineResult<bool> {
        self.require_connected()?;
        match self.get(key, &GetOptions::none()).await? {
            Some(value) => Ok(self.layer_set(target, key, &value, None).await),
            None => Ok(false),
        }
    }

    /// Deletes `key` from every layer strictly higher (faster, less
    /// authoritative) than `target`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn demote(&self, key: &str, target: LayerTag) -> EngineResult<()> {
        self.require_connected()?;
        let higher: &[LayerTag] = match target {
            LayerTag::Postgres => &[LayerTag::Memory, LayerTag::Redis],
            LayerTag::Redis => &[LayerTag::Memory],
            LayerTag::Memory => &[],
        };
        for tag in higher {
            self.layer_delete(*tag, key).await;
        }
        Ok(())
    }

    /// Reads a key's value and tracked metadata along with which layer
    /// answered, most-authoritative layer first. Backs `Client::backup`'s
    /// per-entry `layerInfo`; not part of the read cascade (no warming).
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn inspect(&self, key: &str) -> EngineResult<Option<(LayerTag, Value, EntryMeta)>> {
        self.require_connected()?;
        if let Some(l3) = &self.l3 {
            if let Ok(Some(entry)) = l3.get_with_meta(key).await {
                return Ok(Some((LayerTag::Postgres, entry.value, entry.meta)));
            }
        }
        if let Some(l2) = &self.l2 {
            if let Ok(Some(entry)) = l2.get_with_meta(key).await {
                return Ok(Some((LayerTag::Redis, entry.value, entry.meta)));
            }
        }
        if let Ok(Some(entry)) = self.l1.get_with_meta(key).await {
            return Ok(Some((LayerTag::Memory, entry.value, entry.meta)));
        }
        Ok(None)
    }

    /// Which layers this engine instance actually has configured. L1 is
    /// always present.
    #[must_use]
    pub fn configured_layers(&self) -> Vec<LayerTag> {
        let mut tags = vec![LayerTag::Memory];
        if self.l2.is_some() {
            tags.push(LayerTag::Redis);
        }
        if self.l3.is_some() {
            tags.push(LayerTag::Postgres);
        }
        tags
    }

    /// Enumerates keys matching `pattern` without fetching their values.
    /// Shares the same enumeration source as [`Self::query`] (see the
    /// design notes on the `keys()` open question).
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn keys(&self, pattern: Option<&str>) -> EngineResult<Vec<String>> {
        self.require_connected()?;
        Ok(match &self.l3 {
            Some(l3) => l3.keys_matching(pattern).await.unwrap_or_default(),
            None => self.l1.snapshot_keys(pattern),
        })
    }

    /// Metrics snapshot restricted to `selector`.
    #[must_use]
    pub fn metrics(&self, selector: &LayerSelector) -> MetricsSnapshot {
        self.metrics.snapshot(selector)
    }

    /// Zeroes every per-layer counter. Response-time EMA is left untouched
    /// (see [`MetricsCore::reset`]).
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Whether the engine is in the `Connected` state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Runs `ping()` on each selected layer, best-effort; an absent layer
    /// yields `false` rather than being omitted from the map.
    pub async fn health_check(&self, selector: &LayerSelector) -> HashMap<LayerTag, bool> {
        let mut out = HashMap::new();
        for tag in selector.resolve() {
            out.insert(tag, self.layer_ping(tag).await);
        }
        out
    }

    /// Runs `L1.cleanup()` and, if L3 is present, its expired-row cleanup —
    /// the same work the background scheduler performs, callable on demand.
    pub async fn compact(&self) -> u64 {
        let mut total = self.l1.sweep_expired();
        if let Some(l3) = &self.l3 {
            total += l3.cleanup_expired().await.unwrap_or(0);
        }
        total
    }

    /// Clears all configured layers, or only keys matching `pattern`.
    /// Returns the number of entries actually removed from the most
    /// authoritative layer present, since a homogeneous count across
    /// heterogeneous layers is not meaningful.
    pub async fn clear(&self, pattern: Option<&str>) -> u64 {
        let l1 = self.l1.clear(pattern);
        let l2 = async {
            match &self.l2 {
                Some(l2) => l2.clear(pattern).await.unwrap_or(0),
                None => 0,
            }
        };
        let l3 = async {
            match &self.l3 {
                Some(l3) => l3.clear(pattern).await.unwrap_or(0),
                None => 0,
            }
        };
        let (l1_removed, l2_removed, l3_removed) = tokio::join!(l1, l2, l3);
        if self.l3.is_some() {
            l3_removed
        } else if self.l2.is_some() {
            l2_removed
        } else {
            l1_removed.unwrap_or(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nuvex_core::MemoryConfig;
    use serde_json::json;

    use super::*;
    use crate::layers::FakeLayer;

    fn memory_config() -> MemoryConfig {
        MemoryConfig { ttl: Duration::from_secs(60), max_size: 3, cleanup_interval: None }
    }

    fn engine_with_l3() -> (Arc<StorageEngine>, Arc<FakeLayer>) {
        let l3 = Arc::new(FakeLayer::postgres());
        let engine = StorageEngine::with_fakes(&memory_config(), None, Some(l3.clone()));
        (engine, l3)
    }

    fn engine_with_l2_l3() -> (Arc<StorageEngine>, Arc<FakeLayer>, Arc<FakeLayer>) {
        let l2 = Arc::new(FakeLayer::redis());
        let l3 = Arc::new(FakeLayer::postgres());
        let engine = StorageEngine::with_fakes(&memory_config(), Some(l2.clone()), Some(l3.clone()));
        (engine, l2, l3)
    }

    // Scenario 1 (spec §8): a cascading read warms L1 from an L3 hit, and
    // the warmed value keeps serving reads once L3 goes offline.
    #[tokio::test]
    async fn cascade_read_warms_l1_and_survives_l3_outage() {
        let (engine, l3) = engine_with_l3();
        l3.seed("greeting", json!("hello"));

        let value = engine.get("greeting", &GetOptions::none()).await.unwrap();
        assert_eq!(value, Some(json!("hello")));

        l3.set_online(false);
        let value = engine.get("greeting", &GetOptions::none()).await.unwrap();
        assert_eq!(value, Some(json!("hello")), "L1 should still serve the warmed value");
    }

    // Scenario 2: when L3 rejects a write, `set` reports failure and does
    // not pollute L1/L2, preserving the source-of-truth invariant (I1/I2).
    #[tokio::test]
    async fn l3_write_rejection_skips_cache_fanout() {
        let (engine, l2, l3) = engine_with_l2_l3();
        l3.set_reject_writes(true);

        let accepted = engine.set("k", &json!(1), &SetOptions::default()).await.unwrap();
        assert!(!accepted);
        assert!(!l2.contains("k"));
        assert_eq!(engine.get("k", &GetOptions::layer(LayerTag::Memory)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_l3() {
        let (engine, _l3) = engine_with_l3();
        let ok = engine.set("a", &json!({"n": 1}), &SetOptions::default()).await.unwrap();
        assert!(ok);
        let value = engine.get("a", &GetOptions::none()).await.unwrap();
        assert_eq!(value, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn delete_removes_from_every_layer() {
        let (engine, l2, l3) = engine_with_l2_l3();
        engine.set("a", &json!(1), &SetOptions::default()).await.unwrap();
        assert!(l3.contains("a"));

        let removed = engine.delete("a", &TargetOptions::default()).await.unwrap();
        assert!(removed);
        assert!(!l3.contains("a"));
        assert!(!l2.contains("a"));
        assert!(!engine.exists("a", &TargetOptions::default()).await.unwrap());
    }

    // Increment cascade (I5/P3): the authoritative layer (L3 here) performs
    // the atomic add, and the resulting value -- not a second increment --
    // is fanned out to L2/L1.
    #[tokio::test]
    async fn increment_cascades_from_authoritative_layer_to_caches() {
        let (engine, l2, l3) = engine_with_l2_l3();

        let first = engine.increment("counter", 5, None).await.unwrap();
        assert_eq!(first, 5);
        let second = engine.increment("counter", 3, None).await.unwrap();
        assert_eq!(second, 8);

        assert_eq!(l2.get("counter").await.unwrap(), Some(json!(8)));
        assert_eq!(l3.get("counter").await.unwrap(), Some(json!(8)));
    }

    #[tokio::test]
    async fn set_if_not_exists_only_writes_once_and_fans_out() {
        let (engine, l2, _l3) = engine_with_l2_l3();

        let first = engine.set_if_not_exists("once", &json!("a"), &SetOptions::default()).await.unwrap();
        assert!(first);
        let second = engine.set_if_not_exists("once", &json!("b"), &SetOptions::default()).await.unwrap();
        assert!(!second);

        assert_eq!(engine.get("once", &GetOptions::none()).await.unwrap(), Some(json!("a")));
        assert!(l2.contains("once"));
    }

    #[tokio::test]
    async fn query_enumerates_via_l3_sorts_and_paginates() {
        let (engine, _l3) = engine_with_l3();
        for (key, value) in [("b", 2), ("a", 1), ("c", 3)] {
            engine.set(key, &json!(value), &SetOptions::default()).await.unwrap();
        }

        let result = engine.query(&QueryOptions { limit: 2, ..QueryOptions::default() }).await.unwrap();
        assert_eq!(result.items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn query_falls_back_to_l1_snapshot_without_l3() {
        let engine = StorageEngine::memory_only(&memory_config());
        engine.set("x", &json!(1), &SetOptions::default()).await.unwrap();

        let result = engine.query(&QueryOptions::default()).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].key, "x");
    }

    // Scenario 6: health_check reports each selected layer independently --
    // an offline L2 does not make a present L3 report unhealthy.
    #[tokio::test]
    async fn health_check_reports_each_layer_independently() {
        let (engine, l2, _l3) = engine_with_l2_l3();
        l2.set_online(false);

        let health = engine.health_check(&LayerSelector::All).await;
        assert_eq!(health.get(&LayerTag::Memory), Some(&true));
        assert_eq!(health.get(&LayerTag::Redis), Some(&false));
        assert_eq!(health.get(&LayerTag::Postgres), Some(&true));
    }

    #[tokio::test]
    async fn configured_layers_reflects_what_was_wired_in() {
        let (engine, _l3) = engine_with_l3();
        assert_eq!(engine.configured_layers(), vec![LayerTag::Memory, LayerTag::Postgres]);

        let memory_only = StorageEngine::memory_only(&memory_config());
        assert_eq!(memory_only.configured_layers(), vec![LayerTag::Memory]);
    }

    #[tokio::test]
    async fn operations_fail_fast_once_disconnected() {
        let (engine, _l3) = engine_with_l3();
        engine.disconnect().await;
        let err = engine.get("a", &GetOptions::none()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotConnected));
    }

    #[tokio::test]
    async fn promote_copies_current_value_into_a_higher_layer() {
        let (engine, l3) = engine_with_l3();
        l3.seed("p", json!("v"));

        let promoted = engine.promote("p", LayerTag::Memory).await.unwrap();
        assert!(promoted);
        assert_eq!(engine.get("p", &GetOptions::layer(LayerTag::Memory)).await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn compact_sweeps_l1_and_invokes_l3_cleanup() {
        let (engine, l3) = engine_with_l3();
        // The fake's cleanup_expired is the trait default (`Ok(0)`); this
        // just verifies compact() tolerates an L3-backed engine without
        // panicking and returns L1's sweep count.
        let _ = l3;
        let removed = engine.compact().await;
        assert_eq!(removed, 0);
    }
}
