//! Structured telemetry initialisation for the worker.
//!
//! Diagnostics go to a duplicate of the stderr descriptor taken at
//! initialisation, so they keep reaching the build tool's log after stream
//! isolation points descriptor 2 at the capture pipe.

use std::fs::File;
use std::io::{self, IsTerminal};
use std::os::fd::AsFd;
use std::sync::Mutex;

use bobbin_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to duplicate the diagnostics descriptor.
    #[error("failed to duplicate stderr for diagnostics: {0}")]
    Stderr(#[source] io::Error),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on first use.
///
/// Must run before [`crate::StdioGuard::acquire`]; later calls return a new
/// handle without touching global state.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter does not parse, stderr cannot
/// be duplicated, or another subscriber is already installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let ansi = io::stderr().is_terminal();
    let diagnostics = io::stderr()
        .as_fd()
        .try_clone_to_owned()
        .map(File::from)
        .map_err(TelemetryError::Stderr)?;

    let builder = |filter: EnvFilter, writer: Mutex<File>| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let writer = Mutex::new(diagnostics);
    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter, writer).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter, writer).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
