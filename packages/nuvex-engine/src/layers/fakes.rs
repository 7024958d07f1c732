//! Deterministic, network-free stand-ins for L2/L3 used by engine-level
//! tests. Generalizes the teacher's `NullDataStore` pattern (a trivial
//! no-op implementation of the storage trait) into fakes that actually hold
//! state and can be toggled offline/failing, so tests can exercise the
//! cascade, fan-out, and failure-propagation behavior without a live
//! Redis/Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nuvex_core::LayerTag;
use parking_lot::Mutex;
use serde_json::Value;

use super::glob::glob_to_regex;
use super::traits::{EntryMeta, Layer, StoredEntry};

struct FakeCell {
    value: Value,
    meta: EntryMeta,
}

struct FakeBackend {
    data: Mutex<HashMap<String, FakeCell>>,
    online: AtomicBool,
    reject_writes: AtomicBool,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            reject_writes: AtomicBool::new(false),
        }
    }

    fn check_online(&self) -> anyhow::Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("fake layer is offline")
        }
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        self.check_online()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            anyhow::bail!("fake layer rejects writes")
        }
        Ok(())
    }
}

/// A `StoreLayer`/`CacheLayer` stand-in with toggleable online/offline and
/// write-rejection state, used to exercise §8's concrete scenarios without
/// a live network dependency.
pub struct FakeLayer {
    tag: LayerTag,
    backend: FakeBackend,
}

impl FakeLayer {
    #[must_use]
    pub fn postgres() -> Self {
        Self { tag: LayerTag::Postgres, backend: FakeBackend::new() }
    }

    #[must_use]
    pub fn redis() -> Self {
        Self { tag: LayerTag::Redis, backend: FakeBackend::new() }
    }

    /// Directly seeds a value, bypassing the online/reject checks — used to
    /// set up test preconditions.
    pub fn seed(&self, key: &str, value: Value) {
        self.backend.data.lock().insert(
            key.to_string(),
            FakeCell { value, meta: EntryMeta { created_at: Utc::now(), version: 1 } },
        );
    }

    pub fn set_online(&self, online: bool) {
        self.backend.online.store(online, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.backend.reject_writes.store(reject, Ordering::SeqCst);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.backend.data.lock().contains_key(key)
    }
}

#[async_trait]
impl Layer for FakeLayer {
    fn tag(&self) -> LayerTag {
        self.tag
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        self.backend.check_online()?;
        Ok(self.backend.data.lock().get(key).map(|cell| cell.value.clone()))
    }

    async fn get_with_meta(&self, key: &str) -> anyhow::Result<Option<StoredEntry>> {
        self.backend.check_online()?;
        Ok(self
            .backend
            .data
            .lock()
            .get(key)
            .map(|cell| StoredEntry { value: cell.value.clone(), meta: cell.meta }))
    }

    async fn set(&self, key: &str, value: &Value, _ttl: Option<Duration>) -> anyhow::Result<()> {
        self.backend.check_writable()?;
        let mut data = self.backend.data.lock();
        let version = data.get(key).map_or(1, |cell| cell.meta.version.saturating_add(1));
        data.insert(
            key.to_string(),
            FakeCell { value: value.clone(), meta: EntryMeta { created_at: Utc::now(), version } },
        );
        Ok(())
    }

    async fn set_if_not_exists(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<bool> {
        self.backend.check_writable()?;
        if self.backend.data.lock().contains_key(key) {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.backend.check_writable()?;
        Ok(self.backend.data.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.backend.check_online()?;
        Ok(self.backend.data.lock().contains_key(key))
    }

    async fn clear(&self, pattern: Option<&str>) -> anyhow::Result<u64> {
        self.backend.check_writable()?;
        let mut data = self.backend.data.lock();
        match pattern {
            None => {
                let count = data.len();
                data.clear();
                Ok(count as u64)
            }
            Some(pattern) => {
                let re = glob_to_regex(pattern);
                let matching: Vec<String> = data.keys().filter(|k| re.is_match(k)).cloned().collect();
                for key in &matching {
                    data.remove(key);
                }
                Ok(matching.len() as u64)
            }
        }
    }

    async fn ping(&self) -> bool {
        self.backend.online.load(Ordering::SeqCst)
    }

    async fn increment(&self, key: &str, delta: i64, _ttl: Option<Duration>) -> anyhow::Result<i64> {
        self.backend.check_writable()?;
        let mut data = self.backend.data.lock();
        let current = data.get(key).and_then(|cell| cell.value.as_i64()).unwrap_or(0);
        let new_value = current + delta;
        let version = data.get(key).map_or(1, |cell| cell.meta.version.saturating_add(1));
        data.insert(
            key.to_string(),
            FakeCell { value: Value::from(new_value), meta: EntryMeta { created_at: Utc::now(), version } },
        );
        Ok(new_value)
    }

    async fn keys_matching(&self, pattern: Option<&str>) -> anyhow::Result<Vec<String>> {
        self.backend.check_online()?;
        let data = self.backend.data.lock();
        let mut keys: Vec<String> = match pattern {
            None => data.keys().cloned().collect(),
            Some(pattern) => {
                let re = glob_to_regex(pattern);
                data.keys().filter(|k| re.is_match(k)).cloned().collect()
            }
        };
        keys.sort();
        Ok(keys)
    }
}
