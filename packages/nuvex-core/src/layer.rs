//! The closed set of storage tiers and the selector types used to target or
//! filter them.

use serde::{Deserialize, Serialize};

/// A single storage tier.
///
/// Closed by design (see the design notes on replacing duck-typed layer
/// strings with a sum type): the engine owns exactly three named fields, one
/// per variant, never a homogeneous collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerTag {
    /// L1: in-process LRU memory cache.
    Memory,
    /// L2: optional distributed cache (Redis).
    Redis,
    /// L3: durable relational store (Postgres).
    Postgres,
}

impl LayerTag {
    /// Human-readable name, used as metrics/health map keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LayerTag::Memory => "memory",
            LayerTag::Redis => "redis",
            LayerTag::Postgres => "postgres",
        }
    }

    /// All three tags, outermost (fastest) to innermost (authoritative).
    #[must_use]
    pub fn all() -> [LayerTag; 3] {
        [LayerTag::Memory, LayerTag::Redis, LayerTag::Postgres]
    }
}

/// Selects which layers an operation like `getMetrics`/`healthCheck` should
/// report on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSelector {
    /// Every configured layer.
    All,
    /// A single layer.
    One(LayerTag),
    /// An explicit subset (order preserved in output where it matters).
    Many(Vec<LayerTag>),
}

impl LayerSelector {
    /// Expands the selector into the concrete list of tags it denotes.
    #[must_use]
    pub fn resolve(&self) -> Vec<LayerTag> {
        match self {
            LayerSelector::All => LayerTag::all().to_vec(),
            LayerSelector::One(tag) => vec![*tag],
            LayerSelector::Many(tags) => tags.clone(),
        }
    }
}
