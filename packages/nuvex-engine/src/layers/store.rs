//! L3: durable relational store backed by Postgres.
//!
//! Table/column identifiers come from [`SchemaConfig`] and are attacker
//! input in the sense that they reach this code from configuration, not a
//! literal — `sqlx` bind parameters cover values, never identifiers, so
//! [`validate_identifiers`] is the only injection defense for them and runs
//! once at construction, before any DDL/DML string is built with `format!`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nuvex_core::{validate_identifiers, LayerTag, PostgresConfig, SslMode};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::Row;

use super::glob::glob_to_sql_like;
use super::traits::{EntryMeta, Layer, StoredEntry};

/// L3 Postgres layer.
///
/// Holds a connection pool plus the three validated identifiers substituted
/// into every query; `created_at`/`version`/`expires_at`/`updated_at` are
/// not configurable, so they never need validation.
pub struct StoreLayer {
    pool: sqlx::PgPool,
    table: String,
    key_column: String,
    value_column: String,
}

impl StoreLayer {
    /// Builds a connection pool from `config` and validates the configured
    /// identifiers. Does not create the table — see `SchemaManager`.
    pub async fn connect(config: &PostgresConfig) -> anyhow::Result<Self> {
        validate_identifiers(&[
            config.schema.table_name.as_str(),
            config.schema.key_column.as_str(),
            config.schema.value_column.as_str(),
        ])?;

        let ssl_mode = match config.ssl {
            SslMode::Off => PgSslMode::Disable,
            SslMode::Default => PgSslMode::Prefer,
            SslMode::Custom => PgSslMode::Require,
        };

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(config.max)
            .idle_timeout(Some(config.idle_timeout))
            .acquire_timeout(config.connection_timeout)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(pool, config))
    }

    /// Wraps an already-built pool, e.g. one shared with other callers. The
    /// engine never closes a pool supplied this way.
    #[must_use]
    pub fn with_pool(pool: sqlx::PgPool, config: &PostgresConfig) -> Self {
        Self {
            pool,
            table: config.schema.table_name.clone(),
            key_column: config.schema.key_column.clone(),
            value_column: config.schema.value_column.clone(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait]
impl Layer for StoreLayer {
    fn tag(&self) -> LayerTag {
        LayerTag::Postgres
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.get_with_meta(key).await?.map(|entry| entry.value))
    }

    async fn get_with_meta(&self, key: &str) -> anyhow::Result<Option<StoredEntry>> {
        let sql = format!(
            "SELECT {value}, created_at, version FROM {table} WHERE {key} = $1 AND (expires_at IS NULL OR expires_at > now())",
            value = self.value_column,
            table = self.table,
            key = self.key_column,
        );
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        let Some(row) = row else { return Ok(None) };
        let value: Value = row.try_get(0)?;
        let created_at: DateTime<Utc> = row.try_get(1)?;
        let version: i64 = row.try_get(2)?;
        Ok(Some(StoredEntry {
            value,
            meta: EntryMeta {
                created_at,
                #[allow(clippy::cast_sign_loss)]
                version: version as u64,
            },
        }))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        let sql = format!(
            "INSERT INTO {table} ({key}, {value}, created_at, version, expires_at, updated_at)
             VALUES ($1, $2, now(), 1, $3, now())
             ON CONFLICT ({key}) DO UPDATE SET
                 {value} = EXCLUDED.{value},
                 version = {table}.version + 1,
                 expires_at = EXCLUDED.expires_at,
                 updated_at = now()",
            table = self.table,
            key = self.key_column,
            value = self.value_column,
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> anyhow::Result<bool> {
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        let sql = format!(
            "INSERT INTO {table} ({key}, {value}, created_at, version, expires_at, updated_at)
             VALUES ($1, $2, now(), 1, $3, now())
             ON CONFLICT ({key}) DO NOTHING
             RETURNING {key}",
            table = self.table,
            key = self.key_column,
            value = self.value_column,
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let sql = format!(
            "DELETE FROM {table} WHERE {key} = $1",
            table = self.table,
            key = self.key_column,
        );
        let result = sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {table} WHERE {key} = $1 AND (expires_at IS NULL OR expires_at > now())",
            table = self.table,
            key = self.key_column,
        );
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn clear(&self, pattern: Option<&str>) -> anyhow::Result<u64> {
        let sql = match pattern {
            None => format!("DELETE FROM {table}", table = self.table),
            Some(_) => format!(
                "DELETE FROM {table} WHERE {key} LIKE $1",
                table = self.table,
                key = self.key_column,
            ),
        };
        let query = sqlx::query(&sql);
        let query = match pattern {
            None => query,
            Some(pattern) => query.bind(glob_to_sql_like(pattern)),
        };
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> anyhow::Result<i64> {
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        let sql = format!(
            "INSERT INTO {table} ({key}, {value}, created_at, version, expires_at, updated_at)
             VALUES ($1, to_jsonb($2::bigint), now(), 1, $3, now())
             ON CONFLICT ({key}) DO UPDATE SET
                 {value} = to_jsonb(
                     CASE
                         WHEN {table}.expires_at IS NOT NULL AND {table}.expires_at <= now()
                             THEN $2::bigint
                         ELSE ({table}.{value} #>> '{{}}')::bigint + $2::bigint
                     END
                 ),
                 version = {table}.version + 1,
                 expires_at = CASE
                     WHEN {table}.expires_at IS NOT NULL AND {table}.expires_at <= now()
                         THEN $3
                     ELSE COALESCE($3, {table}.expires_at)
                 END,
                 updated_at = now()
             RETURNING ({value} #>> '{{}}')::bigint",
            table = self.table,
            key = self.key_column,
            value = self.value_column,
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(delta)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let expires_at = Utc::now() + ttl;
        let sql = format!(
            "UPDATE {table} SET expires_at = $2, updated_at = now()
             WHERE {key} = $1 AND (expires_at IS NULL OR expires_at > now())",
            table = self.table,
            key = self.key_column,
        );
        let result = sqlx::query(&sql).bind(key).bind(expires_at).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enumerates keys matching `pattern` (`*`/`?` glob, `None` for all),
    /// excluding expired rows. Backing primitive for `query`, namespace
    /// clearing, `getByPrefix`, and backup.
    async fn keys_matching(&self, pattern: Option<&str>) -> anyhow::Result<Vec<String>> {
        let like = pattern.map(glob_to_sql_like).unwrap_or_else(|| "%".to_string());
        let sql = format!(
            "SELECT {key} FROM {table} WHERE {key} LIKE $1 AND (expires_at IS NULL OR expires_at > now()) ORDER BY {key}",
            key = self.key_column,
            table = self.table,
        );
        let rows = sqlx::query(&sql).bind(like).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| row.get::<String, _>(0)).collect())
    }

    /// Closes the underlying pool. The engine only calls this when it
    /// constructed the pool itself (see `StorageEngine`'s `l3_pool_owned`).
    async fn close(&self) {
        self.pool.close().await;
    }

    /// Invokes the `cleanup_expired_<table>()` function installed by
    /// `SchemaManager::setup`, returning the number of rows it purged.
    async fn cleanup_expired(&self) -> anyhow::Result<u64> {
        let sql = format!("SELECT cleanup_expired_{table}()", table = self.table);
        let row: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(row.0.max(0) as u64)
    }
}
