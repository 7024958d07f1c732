//! The `Layer` capability set shared by L1/L2/L3, and the metadata that
//! travels alongside a stored value.
//!
//! Each concrete layer (`MemoryLayer`, `CacheLayer`, `StoreLayer`) implements
//! this trait; the engine owns one named field per layer rather than a
//! homogeneous collection, because their semantics differ (L3 authoritative,
//! the other two are caches).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nuvex_core::LayerTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata recorded alongside a value, used by `query`'s `createdAt` sort
/// key and by backup snapshots. Never sent over the wire as part of the
/// value itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// A value paired with the metadata the layer tracked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub value: Value,
    pub meta: EntryMeta,
}

/// The capability set common to every storage tier.
///
/// Used as `Arc<dyn Layer>` inside the engine. Boolean- and option-returning
/// methods never propagate transient errors to the caller; the engine logs
/// and degrades per the propagation policy for each layer.
#[async_trait]
pub trait Layer: Send + Sync {
    /// This layer's tag, used in logging and metrics.
    fn tag(&self) -> LayerTag;

    /// Fetch a value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Fetch a value along with its tracked metadata.
    async fn get_with_meta(&self, key: &str) -> anyhow::Result<Option<StoredEntry>>;

    /// Store a value, optionally with a TTL. Overwrites any existing value.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Store a value only if the key is absent. Returns `true` if the value
    /// was written.
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> anyhow::Result<bool>;

    /// Delete a key. Returns `true` if a value was actually removed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    /// Check for the presence of a key without fetching its value.
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Remove every entry, or only those whose key matches `pattern`
    /// (`*`/`?` glob). Returns the number of entries removed.
    async fn clear(&self, pattern: Option<&str>) -> anyhow::Result<u64>;

    /// Non-destructive reachability probe.
    async fn ping(&self) -> bool;

    /// Atomically add `delta` to the integer stored at `key` (creating it
    /// with an implicit base of zero if absent) and return the new value.
    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> anyhow::Result<i64>;

    /// Refresh a key's TTL without altering its value. The default
    /// implementation re-reads and re-writes the value; layers with a native
    /// TTL-touch primitive should override it.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        match self.get(key).await? {
            Some(value) => {
                self.set(key, &value, Some(ttl)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Enumerates keys matching `pattern` (`*`/`?` glob, `None` for all).
    /// Defaults to an empty result: only `StoreLayer` treats full-keyspace
    /// enumeration as a supported primitive (see the `keys()` design notes).
    async fn keys_matching(&self, _pattern: Option<&str>) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Purges expired entries and returns how many were removed. L1 sweeps
    /// in-process; L3 invokes the `cleanup_expired_<table>()` function
    /// installed by `SchemaManager`. A no-op for layers with native
    /// per-entry expiry (L2's Redis `EX`/`PEXPIRE` needs no sweep).
    async fn cleanup_expired(&self) -> anyhow::Result<u64> {
        Ok(0)
    }

    /// Releases any resources this layer owns (e.g. closes a connection
    /// pool). A no-op by default; the engine calls this only for layers it
    /// owns outright, never for a caller-supplied, shared connection.
    async fn close(&self) {}
}
