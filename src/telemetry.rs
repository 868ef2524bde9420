//! Tracing setup keyed on the configured verbosity level.

use miette::Diagnostic;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Subscriber installation failed (usually: one is already set).
#[derive(Debug, Error, Diagnostic)]
#[error("failed to install the tracing subscriber")]
#[diagnostic(
    code(pipegraph::telemetry::init),
    help("init() installs a global subscriber; call it once, before any other crate does.")
)]
pub struct TelemetryError(#[source] Box<dyn std::error::Error + Send + Sync>);

/// Map `general.verbose` to a tracing level for this crate's events.
#[must_use]
pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a global fmt subscriber filtered to this crate at the level the
/// configured verbosity implies. `RUST_LOG` still wins when set.
pub fn init(verbose: u8) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pipegraph={}", level_for(verbose))));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(TelemetryError)
}
