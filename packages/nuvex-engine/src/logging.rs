//! Structured log sink setup.
//!
//! Grounded on the pack's own `tracing_subscriber::registry()` +
//! `EnvFilter` + fmt-layer pattern: a binary embedding the engine calls
//! [`init_tracing`] once at startup and every `tracing::debug!`/`warn!`/
//! `info!` call inside `nuvex-engine`/`nuvex-core`/`nuvex-client` is routed
//! through whatever subscriber that installs.

use nuvex_core::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber from [`LoggingConfig`].
///
/// A no-op if `config.enabled` is `false`: the caller may still have its own
/// subscriber installed, and the engine does not force structured logging on
/// an embedding process that doesn't want it.
pub fn init_tracing(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// A handle that lets a long-lived process swap the active log level without
/// tearing down and reinstalling the whole subscriber.
pub type LevelReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Like [`init_tracing`], but keeps a [`LevelReloadHandle`] so `Client::configure`
/// can rebind the log level from a new [`LoggingConfig`] in place.
///
/// Returns `None` if logging is disabled or a subscriber is already
/// installed (`try_init` found one); the caller falls back to whatever
/// subscriber is already active.
pub fn init_tracing_reloadable(config: &LoggingConfig) -> Option<LevelReloadHandle> {
    if !config.enabled {
        return None;
    }
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .ok()?;
    Some(handle)
}

/// Applies a new level string to a handle previously returned by
/// [`init_tracing_reloadable`]. Logs and ignores malformed filter strings
/// rather than failing `configure()` outright.
pub fn reload_level(handle: &LevelReloadHandle, level: &str) {
    match EnvFilter::try_new(level) {
        Ok(filter) => {
            if handle.reload(filter).is_err() {
                tracing::warn!(level, "failed to reload tracing filter: subscriber dropped");
            }
        }
        Err(err) => tracing::warn!(level, error = %err, "invalid log level string; keeping current filter"),
    }
}
