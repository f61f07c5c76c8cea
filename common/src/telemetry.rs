// Structured logging for the batch binaries

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn env_filter(log_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))
}

/// Initialize structured logging
///
/// `RUST_LOG` overrides `log_level`. With `json` every event is one JSON
/// object carrying the current span fields (incident, flavor, arch, ...);
/// otherwise output is human readable.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let filter = env_filter(log_level)?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer().with_target(false).with_filter(filter).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!(log_level = log_level, json = json, "Logging initialized");
    Ok(())
}
