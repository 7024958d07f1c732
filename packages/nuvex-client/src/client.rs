//! Thin high-level facade over [`StorageEngine`]: namespace helpers, batch
//! pass-throughs, a process-singleton lifecycle, and a configuration surface
//! that rebinds the log level in place without reconnecting.
//!
//! Generalizes the teacher's `ServiceRegistry` lifecycle discipline (explicit
//! construction, explicit shutdown) into a single-service facade, per the
//! design notes preferring an explicit handle over a bare global: the
//! singleton (`initialize`/`get_instance`) is offered only as a thin adapter
//! over `create`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nuvex_core::{
    EngineConfig, EngineConfigPatch, EngineError, EngineResult, GetOptions, LayerSelector,
    LayerTag, MetricsSnapshot, QueryOptions, SetOptions, TargetOptions,
};
use nuvex_engine::{init_tracing_reloadable, reload_level, BatchOutcome, EntryMeta, LevelReloadHandle, QueryResult, StorageEngine};
use parking_lot::Mutex;
use serde_json::Value;

static SINGLETON: OnceLock<Mutex<Option<Arc<Client>>>> = OnceLock::new();

fn singleton_slot() -> &'static Mutex<Option<Arc<Client>>> {
    SINGLETON.get_or_init(|| Mutex::new(None))
}

/// High-level facade wrapping [`StorageEngine`] with namespace helpers,
/// a process-singleton lifecycle, and configuration/backup conveniences.
pub struct Client {
    engine: Arc<StorageEngine>,
    config: Mutex<EngineConfig>,
    log_reload: Option<LevelReloadHandle>,
    last_backup_time: Mutex<Option<DateTime<Utc>>>,
}

impl Client {
    /// Builds a new, independent client. Does not touch the process
    /// singleton -- use this when a caller wants an owned handle rather
    /// than the shared instance.
    ///
    /// # Errors
    /// Returns an error if a configured L3 fails to connect.
    pub async fn create(config: EngineConfig) -> EngineResult<Arc<Client>> {
        let log_reload = init_tracing_reloadable(&config.logging);
        let engine = StorageEngine::build(&config).await?;
        Ok(Arc::new(Client {
            engine,
            config: Mutex::new(config),
            log_reload,
            last_backup_time: Mutex::new(None),
        }))
    }

    /// Builds a client and installs it as the process singleton, replacing
    /// any previous instance. The previous instance is not disconnected --
    /// callers that want a clean handoff should `shutdown` it first.
    ///
    /// # Errors
    /// Returns an error if a configured L3 fails to connect.
    pub async fn initialize(config: EngineConfig) -> EngineResult<Arc<Client>> {
        let client = Self::create(config).await?;
        *singleton_slot().lock() = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Fetches the process singleton.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if [`Client::initialize`] has
    /// not been called (or the singleton was since shut down).
    pub fn get_instance() -> EngineResult<Arc<Client>> {
        singleton_slot().lock().clone().ok_or(EngineError::NotConnected)
    }

    /// Disconnects the underlying engine and, if this instance is the
    /// current process singleton, clears it -- returning the singleton to
    /// uninitialized so a later `initialize` can take its place.
    pub async fn shutdown(&self) {
        self.engine.disconnect().await;
        let mut slot = singleton_slot().lock();
        if let Some(current) = slot.as_ref() {
            if std::ptr::eq(Arc::as_ptr(current), self as *const Client) {
                *slot = None;
            }
        }
    }

    /// The engine this client wraps, for callers that need the lower-level
    /// surface directly.
    #[must_use]
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub(crate) fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        *self.last_backup_time.lock()
    }

    pub(crate) fn set_last_backup_time(&self, time: DateTime<Utc>) {
        *self.last_backup_time.lock() = Some(time);
    }

    // -- Plain pass-throughs --------------------------------------------

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn get(&self, key: &str, options: &GetOptions) -> EngineResult<Option<Value>> {
        self.engine.get(key, options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn set(&self, key: &str, value: &Value, options: &SetOptions) -> EngineResult<bool> {
        self.engine.set(key, value, options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn delete(&self, key: &str, options: &TargetOptions) -> EngineResult<bool> {
        self.engine.delete(key, options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn exists(&self, key: &str, options: &TargetOptions) -> EngineResult<bool> {
        self.engine.exists(key, options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn expire(&self, key: &str, ttl: Duration) -> EngineResult<bool> {
        self.engine.expire(key, ttl).await
    }

    /// Non-atomic across concurrent callers: delegates to the engine's
    /// check-then-set `set_if_not_exists`, which itself uses a real CAS
    /// primitive on whichever single layer is authoritative (see the
    /// engine's design notes on the accepted residual race).
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn set_if_not_exists(&self, key: &str, value: &Value, options: &SetOptions) -> EngineResult<bool> {
        self.engine.set_if_not_exists(key, value, options).await
    }

    /// # Errors
    /// Returns an error if the authoritative layer's increment fails.
    pub async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> EngineResult<i64> {
        self.engine.increment(key, delta, ttl).await
    }

    /// # Errors
    /// Returns an error if the authoritative layer's increment fails.
    pub async fn decrement(&self, key: &str, delta: i64, ttl: Option<Duration>) -> EngineResult<i64> {
        self.engine.increment(key, -delta, ttl).await
    }

    pub async fn get_batch(&self, keys: &[String], options: &GetOptions) -> Vec<BatchOutcome<Value>> {
        self.engine.get_batch(keys, options).await
    }

    pub async fn set_batch(&self, entries: &[(String, Value)], options: &SetOptions) -> Vec<BatchOutcome<bool>> {
        self.engine.set_batch(entries, options).await
    }

    pub async fn delete_batch(&self, keys: &[String], options: &TargetOptions) -> Vec<BatchOutcome<bool>> {
        self.engine.delete_batch(keys, options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn query(&self, options: &QueryOptions) -> EngineResult<QueryResult> {
        self.engine.query(options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn keys(&self, pattern: Option<&str>) -> EngineResult<Vec<String>> {
        self.engine.keys(pattern).await
    }

    pub async fn clear(&self, pattern: Option<&str>) -> u64 {
        self.engine.clear(pattern).await
    }

    #[must_use]
    pub fn get_metrics(&self, selector: &LayerSelector) -> MetricsSnapshot {
        self.engine.metrics(selector)
    }

    pub fn reset_metrics(&self) {
        self.engine.reset_metrics();
    }

    pub async fn health_check(&self, selector: &LayerSelector) -> HashMap<LayerTag, bool> {
        self.engine.health_check(selector).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn promote(&self, key: &str, target: LayerTag) -> EngineResult<bool> {
        self.engine.promote(key, target).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn demote(&self, key: &str, target: LayerTag) -> EngineResult<()> {
        self.engine.demote(key, target).await
    }

    /// Reads a key's value, tracked metadata, and which layer answered.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn get_layer_info(&self, key: &str) -> EngineResult<Option<(LayerTag, Value, EntryMeta)>> {
        self.engine.inspect(key).await
    }

    pub async fn compact(&self) -> u64 {
        self.engine.compact().await
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    // -- Namespace helpers -------------------------------------------------

    /// Composes a namespaced key as `"<namespace>:<key>"`.
    #[must_use]
    pub fn namespaced_key(namespace: &str, key: &str) -> String {
        format!("{namespace}:{key}")
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn get_namespaced(&self, namespace: &str, key: &str, options: &GetOptions) -> EngineResult<Option<Value>> {
        self.engine.get(&Self::namespaced_key(namespace, key), options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn set_namespaced(&self, namespace: &str, key: &str, value: &Value, options: &SetOptions) -> EngineResult<bool> {
        self.engine.set(&Self::namespaced_key(namespace, key), value, options).await
    }

    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn delete_namespaced(&self, namespace: &str, key: &str, options: &TargetOptions) -> EngineResult<bool> {
        self.engine.delete(&Self::namespaced_key(namespace, key), options).await
    }

    /// Lists every key under `namespace`, stripped of the `<namespace>:` prefix.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn namespace_keys(&self, namespace: &str) -> EngineResult<Vec<String>> {
        let prefix = format!("{namespace}:");
        let keys = self.engine.keys(Some(&format!("{prefix}*"))).await?;
        Ok(keys.into_iter().map(|k| k.trim_start_matches(&prefix).to_string()).collect())
    }

    /// Clears every key under `namespace`. Returns the number removed.
    pub async fn clear_namespace(&self, namespace: &str) -> u64 {
        self.engine.clear(Some(&format!("{namespace}:*"))).await
    }

    /// Enumerates keys with `prefix` and fetches each via the cascade.
    ///
    /// # Errors
    /// Returns [`EngineError::NotConnected`] if the engine is not connected.
    pub async fn get_by_prefix(&self, prefix: &str) -> EngineResult<HashMap<String, Value>> {
        let keys = self.engine.keys(Some(&format!("{prefix}*"))).await?;
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.engine.get(&key, &GetOptions::none()).await? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    // -- Configuration -------------------------------------------------------

    /// Merges `patch` into the stored configuration and, if it touches
    /// `logging`, reloads the active tracing filter in place. Does not
    /// reconnect the engine -- a changed `postgres`/`redis` section only
    /// takes effect on the next `Client::create`/`initialize`.
    pub fn configure(&self, patch: EngineConfigPatch) {
        let new_logging = patch.logging.clone();
        self.config.lock().merge(patch);
        if let Some(logging) = new_logging {
            if logging.enabled {
                if let Some(handle) = &self.log_reload {
                    reload_level(handle, &logging.level);
                }
            }
        }
    }

    #[must_use]
    pub fn get_config(&self) -> EngineConfig {
        self.config.lock().clone()
    }
}

fn memory_only_config() -> EngineConfig {
    EngineConfig {
        postgres: nuvex_core::PostgresConfig { host: String::new(), ..nuvex_core::PostgresConfig::default() },
        memory: nuvex_core::MemoryConfig { max_size: 100, ..nuvex_core::MemoryConfig::default() },
        ..EngineConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn namespaced_get_set_round_trips_under_the_composed_key() {
        let client = Client::create(memory_only_config()).await.unwrap();
        client.set_namespaced("users", "1", &json!({"name": "a"}), &SetOptions::default()).await.unwrap();

        let direct = client.get(&Client::namespaced_key("users", "1"), &GetOptions::none()).await.unwrap();
        assert_eq!(direct, Some(json!({"name": "a"})));

        let via_namespace = client.get_namespaced("users", "1", &GetOptions::none()).await.unwrap();
        assert_eq!(via_namespace, Some(json!({"name": "a"})));
    }

    #[tokio::test]
    async fn namespace_keys_strips_the_prefix() {
        let client = Client::create(memory_only_config()).await.unwrap();
        client.set_namespaced("users", "1", &json!(1), &SetOptions::default()).await.unwrap();
        client.set_namespaced("users", "2", &json!(2), &SetOptions::default()).await.unwrap();
        client.set("other:3", &json!(3), &SetOptions::default()).await.unwrap();

        let mut keys = client.namespace_keys("users").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn get_by_prefix_fetches_every_matching_key() {
        let client = Client::create(memory_only_config()).await.unwrap();
        client.set("order:1", &json!("a"), &SetOptions::default()).await.unwrap();
        client.set("order:2", &json!("b"), &SetOptions::default()).await.unwrap();
        client.set("user:1", &json!("c"), &SetOptions::default()).await.unwrap();

        let found = client.get_by_prefix("order:").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("order:1"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn decrement_is_increment_with_a_negated_delta() {
        let client = Client::create(memory_only_config()).await.unwrap();
        client.increment("c", 10, None).await.unwrap();
        let after = client.decrement("c", 3, None).await.unwrap();
        assert_eq!(after, 7);
    }

    #[tokio::test]
    async fn configure_merges_without_touching_unset_sections() {
        let client = Client::create(memory_only_config()).await.unwrap();
        let original_host = client.get_config().postgres.host.clone();

        let mut patch = EngineConfigPatch::default();
        patch.memory = Some(nuvex_core::MemoryConfig { max_size: 7, ..nuvex_core::MemoryConfig::default() });
        client.configure(patch);

        let updated = client.get_config();
        assert_eq!(updated.memory.max_size, 7);
        assert_eq!(updated.postgres.host, original_host);
    }

    // Exercises the full singleton lifecycle in one test: running this
    // alongside another test that also touches the process-global
    // singleton would race, so every singleton assertion lives here.
    #[tokio::test]
    async fn singleton_lifecycle_goes_uninitialized_to_initialized_and_back() {
        // A prior test in this binary may have left a singleton installed;
        // clear it so this test's assumptions hold regardless of order.
        *singleton_slot().lock() = None;

        assert!(matches!(Client::get_instance(), Err(EngineError::NotConnected)));

        let initialized = Client::initialize(memory_only_config()).await.unwrap();
        initialized.set("k", &json!(1), &SetOptions::default()).await.unwrap();

        let fetched = Client::get_instance().unwrap();
        assert_eq!(fetched.get("k", &GetOptions::none()).await.unwrap(), Some(json!(1)));

        fetched.shutdown().await;
        assert!(matches!(Client::get_instance(), Err(EngineError::NotConnected)));
    }
}
