//! Explicit option structs for the public operations.
//!
//! Replaces the source's duck-typed option bags (see design notes) with a
//! small closed set of structs carrying optional fields.

use std::time::Duration;

use crate::layer::LayerTag;

/// Options for `get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// TTL to apply when warming a higher cache layer after a deeper hit.
    /// Defaults to the engine's configured cache TTL when absent.
    pub ttl: Option<Duration>,
    /// Restrict the read to a single layer instead of the full cascade.
    pub layer: Option<LayerTag>,
    /// Bypass L1/L2 entirely and read straight from L3.
    pub skip_cache: bool,
}

impl GetOptions {
    /// Shorthand for a plain cascading read with no options set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Restrict the read to a single layer.
    #[must_use]
    pub fn layer(layer: LayerTag) -> Self {
        Self {
            layer: Some(layer),
            ..Self::default()
        }
    }
}

/// Options for `set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Time-to-live for the new value. Absent means no expiry.
    pub ttl: Option<Duration>,
    /// Restrict the write to a single layer (layer-targeted intent bypasses
    /// the L3-source-of-truth rule for that one call).
    pub layer: Option<LayerTag>,
}

impl SetOptions {
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            layer: None,
        }
    }

    #[must_use]
    pub fn layer(layer: LayerTag) -> Self {
        Self {
            ttl: None,
            layer: Some(layer),
        }
    }
}

/// Options shared by `delete`/`exists` — just the optional layer target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetOptions {
    pub layer: Option<LayerTag>,
}

impl TargetOptions {
    #[must_use]
    pub fn layer(layer: LayerTag) -> Self {
        Self { layer: Some(layer) }
    }
}

/// Sort key for `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Key,
    CreatedAt,
}

/// Options for `query`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Glob pattern (`*`/`?`) restricting which keys are enumerated. `None`
    /// enumerates every non-internal key.
    pub pattern: Option<String>,
    pub sort_by: SortKey,
    pub descending: bool,
    pub offset: usize,
    pub limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            pattern: None,
            sort_by: SortKey::Key,
            descending: false,
            offset: 0,
            limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_options_layer_sets_only_layer() {
        let opts = GetOptions::layer(LayerTag::Postgres);
        assert_eq!(opts.layer, Some(LayerTag::Postgres));
        assert!(!opts.skip_cache);
        assert!(opts.ttl.is_none());
    }

    #[test]
    fn set_options_with_ttl_leaves_layer_unset() {
        let opts = SetOptions::with_ttl(Duration::from_secs(5));
        assert_eq!(opts.ttl, Some(Duration::from_secs(5)));
        assert!(opts.layer.is_none());
    }

    #[test]
    fn query_options_default_sorts_by_key_ascending() {
        let opts = QueryOptions::default();
        assert_eq!(opts.sort_by, SortKey::Key);
        assert!(!opts.descending);
        assert_eq!(opts.offset, 0);
        assert_eq!(opts.limit, 100);
    }
}
