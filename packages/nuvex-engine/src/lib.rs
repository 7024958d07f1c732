//! Nuvex engine -- the tiered storage orchestrator: L1 memory + L2 Redis +
//! L3 Postgres, cascading reads, L3-first writes, and health/metrics.
//!
//! - **Layers** ([`layers`]): concrete L1/L2/L3 implementations and the
//!   shared [`layers::Layer`] capability set.
//! - **Engine** ([`engine`]): [`StorageEngine`], the orchestrator composing
//!   the three tiers into the public read/write/increment/query surface.
//! - **Logging** ([`logging`]): a `tracing-subscriber` init helper so a
//!   binary embedding the engine gets structured logs without hand-rolling
//!   a subscriber.

pub mod engine;
pub mod layers;
pub mod logging;

pub use engine::{BatchOutcome, QueryItem, QueryResult, StorageEngine};
pub use layers::{EntryMeta, Layer};
pub use logging::{init_tracing, init_tracing_reloadable, reload_level, LevelReloadHandle};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
