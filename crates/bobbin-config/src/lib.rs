//! Shared configuration for the Bobbin persistent worker.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults are
//! overridden by a configuration file, which is overridden by `BOBBIN_*`
//! environment variables, which are in turn overridden by command-line flags.
//! The worker binary receives extra arguments from the build tool (most
//! notably `--persistent_worker`), so callers are expected to pass only the
//! flags listed in [`CONFIG_CLI_FLAGS`] to [`Config::load_from_iter`].

mod defaults;
mod logging;

use std::time::Duration;

use bobbin_protocol::WireFormat;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_DRAIN_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DEFAULT_MAX_FRAME_BYTES,
    MIN_MAX_FRAME_BYTES, default_log_filter, default_log_format, default_wire_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Command-line flags understood by the configuration loader.
///
/// Every other worker argument is forwarded untouched to the worker runtime.
pub const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--drain-timeout-secs",
    "--max-frame-bytes",
    "--wire-format",
];

/// Resolved worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "BOBBIN")]
pub struct Config {
    /// `tracing` filter expression applied to worker diagnostics.
    #[ortho_config(default = String::from(DEFAULT_LOG_FILTER))]
    pub log_filter: String,
    /// Output format for worker diagnostics.
    #[ortho_config(default = LogFormat::Json)]
    pub log_format: LogFormat,
    /// Upper bound, in seconds, on waiting for in-flight requests after the
    /// request stream closes.
    #[ortho_config(default = DEFAULT_DRAIN_TIMEOUT_SECS)]
    pub drain_timeout_secs: u64,
    /// Largest accepted request frame in bytes.
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    /// Framing of protocol messages on the worker's standard streams.
    #[ortho_config(default = WireFormat::Proto)]
    pub wire_format: WireFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: String::from(default_log_filter()),
            log_format: default_log_format(),
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            wire_format: default_wire_format(),
        }
    }
}

impl Config {
    /// Filter expression handed to the telemetry subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Diagnostic output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Bound on the shutdown drain.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Largest accepted request frame in bytes.
    #[must_use]
    pub const fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Framing the build tool uses on the protocol streams.
    #[must_use]
    pub const fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    /// Rejects values the worker cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the drain bound is zero or the frame limit
    /// is below [`MIN_MAX_FRAME_BYTES`].
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.drain_timeout_secs == 0 {
            return Err(ConfigError::ZeroDrainTimeout);
        }
        if self.max_frame_bytes < MIN_MAX_FRAME_BYTES {
            return Err(ConfigError::FrameLimitTooSmall {
                configured: self.max_frame_bytes,
                minimum: MIN_MAX_FRAME_BYTES,
            });
        }
        Ok(())
    }
}

/// Semantic validation failures for an otherwise well-formed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A zero drain bound would abandon every in-flight request on shutdown.
    #[error("drain_timeout_secs must be greater than zero")]
    ZeroDrainTimeout,
    /// The frame limit is too small to hold a realistic request.
    #[error("max_frame_bytes {configured} is below the minimum of {minimum}")]
    FrameLimitTooSmall {
        /// Configured limit.
        configured: usize,
        /// Smallest accepted limit.
        minimum: usize,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_allow_an_hour_long_drain() {
        let config = Config::default();
        assert_eq!(config.drain_timeout(), Duration::from_secs(3600));
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.wire_format(), WireFormat::Proto);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(0, DEFAULT_MAX_FRAME_BYTES, ConfigError::ZeroDrainTimeout)]
    #[case(
        10,
        16,
        ConfigError::FrameLimitTooSmall { configured: 16, minimum: MIN_MAX_FRAME_BYTES }
    )]
    fn validation_rejects_unusable_values(
        #[case] drain_timeout_secs: u64,
        #[case] max_frame_bytes: usize,
        #[case] expected: ConfigError,
    ) {
        let config = Config {
            drain_timeout_secs,
            max_frame_bytes,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn config_flags_are_long_options() {
        assert!(CONFIG_CLI_FLAGS.iter().all(|flag| flag.starts_with("--")));
        assert!(!CONFIG_CLI_FLAGS.contains(&"--persistent_worker"));
    }
}
