//! Tracing subscriber setup for binaries and tests embedding the graph.

use crate::core::config::TelemetryConfig;
use crate::core::errors::Result;
use tracing_subscriber::FmtSubscriber;

/// Install a global fmt subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed, so it
/// is safe to call from every test.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool> {
    let level = config.max_level()?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(config.ansi)
        .with_target(false)
        .finish();

    Ok(tracing::subscriber::set_global_default(subscriber).is_ok())
}
