//! Configuration loading and process-level setup ahead of serving.

use std::ffi::{OsStr, OsString};
use std::sync::Arc;

use bobbin_config::{CONFIG_CLI_FLAGS, Config, ConfigError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Abstracts configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads configuration from the configuration flags in `args`.
    ///
    /// `args` starts with the program name, as `std::env::args_os` does.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when a layer fails to parse.
    fn load(&self, args: &[OsString]) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that layers defaults, files, `BOBBIN_*` variables and flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter(config_arguments(args))
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced while preparing the worker.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds unusable values.
    #[error("invalid configuration: {source}")]
    InvalidConfiguration {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Loads and validates configuration, then installs telemetry.
///
/// # Errors
///
/// Returns [`BootstrapError`] naming the step that failed.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    args: &[OsString],
) -> Result<(Config, TelemetryHandle), BootstrapError> {
    let config = loader
        .load(args)
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| BootstrapError::InvalidConfiguration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    Ok((config, telemetry))
}

/// Keeps the program name plus every configuration flag and its value.
///
/// Flags may appear anywhere among the worker arguments; everything else,
/// including `--persistent_worker`, is dropped.
pub(crate) fn config_arguments(args: &[OsString]) -> Vec<OsString> {
    let mut filtered = Vec::new();
    let mut arguments = args.iter();
    if let Some(program) = arguments.next() {
        filtered.push(program.clone());
    }
    while let Some(argument) = arguments.next() {
        match classify(argument) {
            FlagKind::Inline => filtered.push(argument.clone()),
            FlagKind::Separate => {
                filtered.push(argument.clone());
                if let Some(value) = arguments.next() {
                    filtered.push(value.clone());
                }
            }
            FlagKind::Other => {}
        }
    }
    filtered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagKind {
    Inline,
    Separate,
    Other,
}

fn classify(argument: &OsStr) -> FlagKind {
    let text = argument.to_string_lossy();
    let (flag, inline) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if !CONFIG_CLI_FLAGS.contains(&flag) {
        FlagKind::Other
    } else if inline {
        FlagKind::Inline
    } else {
        FlagKind::Separate
    }
}
