//! Tracing setup for the indexer.
//!
//! Initializes a console `fmt` layer with an `RUST_LOG`-driven `EnvFilter`.
//! There is no outward-facing service boundary for this crate to export
//! spans from, so unlike the wider stack this shares ancestry with, there is
//! no OTLP exporter layer here.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// # Arguments
/// * `log_level` – minimum tracing level for the fmt layer, used when
///   `RUST_LOG` is unset.
pub fn init_telemetry(log_level: Level) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("tracing initialized");
    Ok(())
}
