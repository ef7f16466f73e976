use bobbin_protocol::WireFormat;

use crate::logging::LogFormat;

/// Default log filter expression used by the worker.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Build actions can legitimately run for a long time, so the shutdown drain
/// waits up to an hour before abandoning in-flight requests.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 60 * 60;

/// Default upper bound on a single request frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Smallest frame limit the worker accepts.
pub const MIN_MAX_FRAME_BYTES: usize = 4 * 1024;

/// Default log filter expression used by the worker.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the worker.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default framing: length-delimited protobuf, as the build tool sends unless
/// configured otherwise.
#[must_use]
pub const fn default_wire_format() -> WireFormat {
    WireFormat::Proto
}
