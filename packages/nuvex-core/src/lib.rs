//! Nuvex core -- shared types, configuration, errors, and metrics primitives
//! for the tiered storage engine.
//!
//! This crate provides the foundation layer shared by the engine and any
//! binary embedding it:
//!
//! - **Config** ([`config`]): `EngineConfig` and its per-layer sections
//! - **Error** ([`error`]): `EngineError`, the typed error surface
//! - **Layer** ([`layer`]): `LayerTag`, `LayerSelector`
//! - **Options** ([`options`]): explicit option structs for public operations
//! - **Identifier** ([`identifier`]): schema identifier validation
//! - **EMA** ([`ema`]): exponential moving average for response-time metrics
//! - **Metrics** ([`metrics`]): per-layer counters and snapshots

pub mod config;
pub mod ema;
pub mod error;
pub mod identifier;
pub mod layer;
pub mod metrics;
pub mod options;

pub use config::{EngineConfig, EngineConfigPatch, LoggingConfig, MemoryConfig, PostgresConfig, RedisConfig, SchemaConfig, SslMode};
pub use ema::Ema;
pub use error::{EngineError, EngineResult};
pub use identifier::{validate_identifier, validate_identifiers};
pub use layer::{LayerSelector, LayerTag};
pub use metrics::{LayerCounters, LayerCountersSnapshot, MetricsCore, MetricsSnapshot};
pub use options::{GetOptions, QueryOptions, SetOptions, SortKey, TargetOptions};
