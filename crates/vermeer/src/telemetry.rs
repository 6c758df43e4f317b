use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vermeer_error::{ConfigError, VermeerResult};

/// Install a console subscriber filtered by `RUST_LOG`.
///
/// Falls back to `info,vermeer=debug` when `RUST_LOG` is unset or invalid.
///
/// # Errors
///
/// Returns a configuration error when a global subscriber is already set.
pub fn init_tracing() -> VermeerResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vermeer=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| ConfigError::new(format!("Failed to install tracing subscriber: {}", e)))?;

    info!("Tracing initialized");
    Ok(())
}
