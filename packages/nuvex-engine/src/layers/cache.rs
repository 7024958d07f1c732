//! L2: optional distributed cache backed by Redis.
//!
//! Uses `redis::aio::ConnectionManager`, which transparently reconnects on
//! transport errors, instead of a bare `MultiplexedConnection` — the engine
//! never needs to notice a dropped connection and reconnect by hand.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nuvex_core::LayerTag;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

use super::glob::glob_to_regex;
use super::traits::{EntryMeta, Layer, StoredEntry};

/// L2 Redis layer.
///
/// Values are stored JSON-encoded; a dedicated companion key (`<key>:meta`)
/// holds the version counter so `createdAt`/`version` survive an L2 round
/// trip. Redis itself tracks expiry natively via `EX`/`PEXPIRE`.
pub struct CacheLayer {
    conn: ConnectionManager,
    default_ttl: Duration,
}

fn meta_key(key: &str) -> String {
    format!("{key}\u{0}meta")
}

impl CacheLayer {
    pub async fn connect(url: &str, default_ttl: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, default_ttl })
    }

    fn ttl_seconds(&self, ttl: Option<Duration>) -> Option<u64> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            None
        } else {
            Some(ttl.as_secs().max(1))
        }
    }
}

#[async_trait]
impl Layer for CacheLayer {
    fn tag(&self) -> LayerTag {
        LayerTag::Redis
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_with_meta(&self, key: &str) -> anyhow::Result<Option<StoredEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        let Some(raw) = raw else { return Ok(None) };
        let value = serde_json::from_str(&raw)?;

        let meta_raw: Option<String> = conn.get(meta_key(key)).await?;
        let meta = match meta_raw.and_then(|m| serde_json::from_str::<EntryMeta>(&m).ok()) {
            Some(meta) => meta,
            None => EntryMeta {
                created_at: Utc::now(),
                version: 1,
            },
        };
        Ok(Some(StoredEntry { value, meta }))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(value)?;
        let previous_version = conn
            .get::<_, Option<String>>(meta_key(key))
            .await?
            .and_then(|m| serde_json::from_str::<EntryMeta>(&m).ok())
            .map_or(0, |meta| meta.version);
        let meta = EntryMeta {
            created_at: Utc::now(),
            version: previous_version + 1,
        };
        let encoded_meta = serde_json::to_string(&meta)?;

        match self.ttl_seconds(ttl) {
            Some(seconds) => {
                let _: () = conn.set_ex(key, encoded, seconds).await?;
                let _: () = conn.set_ex(meta_key(key), encoded_meta, seconds).await?;
            }
            None => {
                let _: () = conn.set(key, encoded).await?;
                let _: () = conn.set(meta_key(key), encoded_meta).await?;
            }
        }
        Ok(())
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(value)?;
        let written: bool = match self.ttl_seconds(ttl) {
            Some(seconds) => {
                conn.set_options(
                    key,
                    encoded,
                    redis::SetOptions::default()
                        .with_expiration(redis::SetExpiry::EX(seconds))
                        .conditional_set(redis::ExistenceCheck::NX),
                )
                .await?
            }
            None => {
                conn.set_options(
                    key,
                    encoded,
                    redis::SetOptions::default()
                        .conditional_set(redis::ExistenceCheck::NX),
                )
                .await?
            }
        };
        if written {
            let meta = EntryMeta {
                created_at: Utc::now(),
                version: 1,
            };
            let encoded_meta = serde_json::to_string(&meta)?;
            match self.ttl_seconds(ttl) {
                Some(seconds) => {
                    let _: () = conn.set_ex(meta_key(key), encoded_meta, seconds).await?;
                }
                None => {
                    let _: () = conn.set(meta_key(key), encoded_meta).await?;
                }
            }
        }
        Ok(written)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        let _: i64 = conn.del(meta_key(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn clear(&self, pattern: Option<&str>) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let scan_pattern = pattern.unwrap_or("*");
        let re = pattern.map(glob_to_regex);

        let mut keys: Vec<String> = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next_cursor, chunk): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(scan_pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            for key in chunk {
                if key.contains('\u{0}') {
                    continue;
                }
                if re.as_ref().is_none_or(|re| re.is_match(&key)) {
                    keys.push(key);
                }
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }
        let meta_keys: Vec<String> = keys.iter().map(|k| meta_key(k)).collect();
        let removed: i64 = conn.del(&keys).await?;
        let _: i64 = conn.del(&meta_keys).await?;
        Ok(removed.max(0) as u64)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let new_value: i64 = conn.incr(key, delta).await?;
        if let Some(seconds) = self.ttl_seconds(ttl) {
            let _: bool = conn.expire(key, seconds as i64).await?;
        }
        Ok(new_value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1) as i64;
        let ok: bool = conn.expire(key, seconds).await?;
        if ok {
            let _: bool = conn.expire(meta_key(key), seconds).await.unwrap_or(false);
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn layer() -> Option<CacheLayer> {
        let url = std::env::var("NUVEX_TEST_REDIS_URL").ok()?;
        CacheLayer::connect(&url, Duration::from_secs(60)).await.ok()
    }

    #[tokio::test]
    #[ignore = "requires a live Redis instance at NUVEX_TEST_REDIS_URL"]
    async fn set_then_get_round_trips() {
        let Some(l2) = layer().await else { return };
        l2.set("nuvex-test:a", &Value::from(1), None).await.unwrap();
        assert_eq!(l2.get("nuvex-test:a").await.unwrap(), Some(Value::from(1)));
        l2.delete("nuvex-test:a").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a live Redis instance at NUVEX_TEST_REDIS_URL"]
    async fn increment_accumulates() {
        let Some(l2) = layer().await else { return };
        l2.delete("nuvex-test:counter").await.unwrap();
        assert_eq!(l2.increment("nuvex-test:counter", 1, None).await.unwrap(), 1);
        assert_eq!(l2.increment("nuvex-test:counter", 2, None).await.unwrap(), 3);
        l2.delete("nuvex-test:counter").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a live Redis instance at NUVEX_TEST_REDIS_URL"]
    async fn ping_reports_reachability() {
        let Some(l2) = layer().await else { return };
        assert!(l2.ping().await);
    }

    #[test]
    fn glob_to_regex_still_used_for_local_filtering() {
        let re = glob_to_regex("user:*");
        assert!(re.is_match("user:1"));
    }
}
