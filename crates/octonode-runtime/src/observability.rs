//! Tracing setup driven by `logging.level`, reloadable at runtime.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs the global subscriber once; later calls keep the first one.
///
/// `RUST_LOG` takes precedence over `level` when it parses.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Apply a new logging level at runtime if tracing was initialized here.
///
/// Returns `false` when no reload handle is installed or the level does not parse.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return false;
    };
    let Ok(filter) = EnvFilter::try_new(level) else {
        tracing::warn!(level, "Ignoring invalid logging level");
        return false;
    };
    handle.modify(|f| *f = filter).is_ok()
}
