pub mod config;
pub mod logging;
mod span;
pub mod telemetry;

pub use config::Environment;
pub use logging::setup_logging;
pub use telemetry::{RunAttributes, TelemetryGuard};
