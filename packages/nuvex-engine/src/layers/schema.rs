//! DDL generation and application for the L3 table.
//!
//! Every identifier is validated before it is formatted into a DDL string —
//! see [`nuvex_core::validate_identifiers`]. `SchemaManager` only emits and
//! runs statements; it never guesses at permissions (creating the
//! `pg_trgm`/`pg_cron` extensions themselves is a DBA responsibility).

use nuvex_core::{validate_identifiers, EngineError, SchemaConfig};
use tracing::{info, warn};

/// Drives table/index/trigger/function/schedule setup for one [`SchemaConfig`].
pub struct SchemaManager<'a> {
    pool: &'a sqlx::PgPool,
    config: &'a SchemaConfig,
}

impl<'a> SchemaManager<'a> {
    #[must_use]
    pub fn new(pool: &'a sqlx::PgPool, config: &'a SchemaConfig) -> Self {
        Self { pool, config }
    }

    fn validate(&self) -> Result<(), EngineError> {
        validate_identifiers(&[
            self.config.table_name.as_str(),
            self.config.key_column.as_str(),
            self.config.value_column.as_str(),
        ])
    }

    /// Creates the table, partial index, trigger, and cleanup function. Does
    /// not create the trigram index or the cron schedule — call
    /// [`Self::enable_fuzzy_search`]/[`Self::schedule_cleanup`] for those.
    ///
    /// # Errors
    /// Returns [`EngineError::SchemaInvalidIdentifier`] if any configured
    /// identifier is unsafe, or [`EngineError::SchemaSetup`] if a statement
    /// fails.
    pub async fn setup(&self) -> Result<(), EngineError> {
        self.validate()?;
        let table = &self.config.table_name;
        let key = &self.config.key_column;
        let value = &self.config.value_column;

        self.run(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id bigserial PRIMARY KEY,
                {key} varchar(512) UNIQUE NOT NULL,
                {value} jsonb NOT NULL,
                created_at timestamptz NOT NULL DEFAULT now(),
                version bigint NOT NULL DEFAULT 1,
                expires_at timestamptz,
                updated_at timestamptz NOT NULL DEFAULT now()
            )"
        ))
        .await?;

        self.run(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_expires_at_idx ON {table} (expires_at) WHERE expires_at IS NOT NULL"
        ))
        .await?;

        self.run(&format!(
            "CREATE OR REPLACE FUNCTION {table}_set_updated_at() RETURNS trigger AS $$
             BEGIN
                 NEW.updated_at = now();
                 RETURN NEW;
             END;
             $$ LANGUAGE plpgsql"
        ))
        .await?;

        self.run(&format!("DROP TRIGGER IF EXISTS {table}_updated_at ON {table}"))
            .await?;
        self.run(&format!(
            "CREATE TRIGGER {table}_updated_at BEFORE UPDATE ON {table}
             FOR EACH ROW EXECUTE FUNCTION {table}_set_updated_at()"
        ))
        .await?;

        self.run(&format!(
            "CREATE OR REPLACE FUNCTION cleanup_expired_{table}() RETURNS bigint AS $$
             DECLARE
                 purged bigint;
             BEGIN
                 DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= now();
                 GET DIAGNOSTICS purged = ROW_COUNT;
                 RETURN purged;
             END;
             $$ LANGUAGE plpgsql"
        ))
        .await?;

        info!(table = %table, "L3 schema ready");
        Ok(())
    }

    /// Adds a trigram index on the key column for fuzzy prefix/substring
    /// search. Requires the `pg_trgm` extension; logs a warning and returns
    /// `Ok(())` rather than failing setup if the extension is absent, since
    /// fuzzy search is opt-in convenience, not a required capability.
    pub async fn enable_fuzzy_search(&self) -> Result<(), EngineError> {
        self.validate()?;
        let table = &self.config.table_name;
        let key = &self.config.key_column;
        let sql = format!("CREATE INDEX IF NOT EXISTS {table}_{key}_trgm_idx ON {table} USING gin ({key} gin_trgm_ops)");
        if let Err(err) = sqlx::query(&sql).execute(self.pool).await {
            warn!(error = %err, "pg_trgm index creation failed; is the pg_trgm extension installed?");
        }
        Ok(())
    }

    /// Schedules `cleanup_expired_<table>()` via `pg_cron`. Unlike
    /// [`Self::enable_fuzzy_search`], this is a hard failure if `pg_cron` is
    /// unavailable: once a caller asks for scheduling, it must actually run.
    ///
    /// # Errors
    /// Returns [`EngineError::SchemaSetup`] if `cron.schedule` fails.
    pub async fn schedule_cleanup(&self, cron_expression: &str) -> Result<(), EngineError> {
        self.validate()?;
        let table = &self.config.table_name;
        let job_name = format!("{table}_cleanup");
        let sql = "SELECT cron.schedule($1, $2, $3)";
        let command = format!("SELECT cleanup_expired_{table}()");
        sqlx::query(sql)
            .bind(&job_name)
            .bind(cron_expression)
            .bind(&command)
            .execute(self.pool)
            .await
            .map_err(|err| EngineError::SchemaSetup(err.into()))?;
        Ok(())
    }

    async fn run(&self, sql: &str) -> Result<(), EngineError> {
        sqlx::query(sql)
            .execute(self.pool)
            .await
            .map_err(|err| EngineError::SchemaSetup(err.into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unsafe_table_name() {
        let config = SchemaConfig {
            table_name: "entries; DROP TABLE users;--".to_string(),
            ..SchemaConfig::default()
        };
        assert!(validate_identifiers(&[config.table_name.as_str()]).is_err());
    }

    #[test]
    fn validate_accepts_default_config() {
        let config = SchemaConfig::default();
        assert!(validate_identifiers(&[
            config.table_name.as_str(),
            config.key_column.as_str(),
            config.value_column.as_str(),
        ])
        .is_ok());
    }
}
