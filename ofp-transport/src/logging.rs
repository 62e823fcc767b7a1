//! Optional tracing-subscriber bootstrap for binaries that embed this crate
//! and have not already installed their own subscriber.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Install a global `tracing` subscriber filtered by `level` (e.g. "debug",
/// "ofp_transport=trace,warn"). Safe to skip entirely if the embedding
/// application already owns its own subscriber.
pub fn init_tracing(level: &str, show_target: bool) -> Result<(), String> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(show_target);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("failed to set global tracing subscriber: {e}"))
}
