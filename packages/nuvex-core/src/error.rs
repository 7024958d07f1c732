//! Shared error type for the tiered storage engine.
//!
//! Mirrors the error-kind taxonomy from the design: most variants are
//! non-fatal and downgraded to `None`/`false` by the caller, a handful are
//! fatal and propagate as `Err`. See each variant's doc comment for which.

use thiserror::Error;

/// Errors surfaced across the Nuvex storage stack.
///
/// Boolean- and option-returning operations never propagate these directly;
/// they log and degrade instead. `increment` and schema setup are the
/// exceptions — see the crate-level design notes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A public operation was attempted while the engine was not in the
    /// `Connected` state.
    #[error("storage engine is not connected")]
    NotConnected,

    /// The L3 (Postgres) write failed. Fatal on the default `set`/`increment`
    /// path — no cache fan-out is attempted when this occurs.
    #[error("L3 write failed: {0}")]
    L3Write(#[source] anyhow::Error),

    /// The L3 read failed. Non-fatal: treated as a cache miss by the caller.
    #[error("L3 read failed: {0}")]
    L3Read(#[source] anyhow::Error),

    /// A transient L2 (Redis) error. Non-fatal: treated as a miss or a
    /// best-effort fan-out failure.
    #[error("L2 transient error: {0}")]
    L2Transient(#[source] anyhow::Error),

    /// An unexpected internal L1 error. L1 cannot fail under normal
    /// operation; this variant exists for defensive completeness only.
    #[error("L1 internal error: {0}")]
    L1Internal(#[source] anyhow::Error),

    /// An identifier passed to schema DDL/DML generation did not match
    /// `^[A-Za-z_][A-Za-z0-9_]*$`. Fatal during schema setup.
    #[error("invalid identifier `{0}`: must match ^[A-Za-z_][A-Za-z0-9_]*$")]
    SchemaInvalidIdentifier(String),

    /// Schema setup (table/index/trigger/function/schedule creation) failed.
    /// Fatal.
    #[error("schema setup failed: {0}")]
    SchemaSetup(#[source] anyhow::Error),

    /// Backup file I/O failed. Fatal to the backup operation only.
    #[error("backup I/O failed: {0}")]
    BackupIo(#[source] anyhow::Error),

    /// A backup envelope could not be parsed. Fatal to the restore operation
    /// only.
    #[error("restore format error: {0}")]
    RestoreFormat(#[source] anyhow::Error),

    /// A value could not be (de)serialized. On read, the key is treated as
    /// absent; on write, the call fails.
    #[error("serialization error: {0}")]
    Serialization(#[source] anyhow::Error),

    /// The authoritative layer for an `increment` cascade could not be
    /// reached. Increment is the one value-returning operation that
    /// propagates failures rather than silently returning a wrong number.
    #[error("no available layer to perform increment")]
    NoLayerAvailable,
}

pub type EngineResult<T> = Result<T, EngineError>;
