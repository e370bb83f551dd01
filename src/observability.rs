//! Structured logging setup.
//!
//! lrt's own operational events go through `tracing`; the wrapped service's
//! stdout/stderr are inherited and reach the terminal untouched, as do
//! compiler diagnostics. Supports plain text or JSON output and honors
//! `RUST_LOG` when set.

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Initialize the global tracing subscriber.
///
/// # Panics
///
/// Panics if a subscriber has already been installed in this process.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer().json().with_target(true);
        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer().with_target(true);
        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::debug!("tracing initialized: level={}, json={}", level, json);
}
