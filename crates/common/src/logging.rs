use crate::config::Environment;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// `RUST_LOG`, or `info` when unset or invalid.
pub(crate) fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Pretty lines for development, JSON for production. Always on stderr, stdout
/// carries the run results.
pub(crate) fn fmt_layer(environment: Environment) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match environment {
        Environment::Production => layer.json().with_level(true).boxed(),
        Environment::Development => layer.pretty().with_ansi(true).boxed(),
    }
}

/// Install a log-only subscriber, used when no OTLP collector is configured.
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_logging(environment: Environment) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt_layer(environment))
        .with(env_filter())
        .try_init()?;
    Ok(())
}
