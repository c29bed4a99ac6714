// Logging module - Logging infrastructure
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use std::io;

/// Filter used when neither `RUST_LOG` nor a configured level applies
pub const DEFAULT_FILTER: &str = "gattpool=info";

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the
/// configured level.
pub fn build_filter(level: Option<&str>, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if verbose {
        return EnvFilter::new("gattpool=debug");
    }
    level
        .and_then(|level| EnvFilter::try_new(format!("gattpool={}", level)).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging system
pub fn init_logging(level: Option<&str>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(build_filter(level, verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
        )
        .try_init()?;

    tracing::debug!("GattPool logging system initialized");
    Ok(())
}
