//! Isolation of the process standard streams.
//!
//! While a worker runs, the protocol owns the original stdin and stdout.
//! Anything else in the process that writes to descriptors 1 or 2 is
//! captured instead of corrupting the response stream, and surfaces in the
//! output of the next request that finishes.

mod capture;
mod errors;
mod guard;

use std::io::{Read, Write};
use std::sync::Arc;

pub use capture::PipeCapture;
pub use errors::IsolationError;
pub use guard::StdioGuard;

pub(crate) const STDIO_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stdio");

/// Protocol streams handed to the worker once isolation is in place.
pub struct ProtocolStreams {
    /// Source of request frames (the original stdin).
    pub input: Box<dyn Read + Send>,
    /// Destination of response frames (the original stdout).
    pub output: Box<dyn Write + Send>,
}

impl std::fmt::Debug for ProtocolStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolStreams").finish_non_exhaustive()
    }
}

/// Buffer of stray text written while isolation is active.
pub trait CapturedOutput: Send + Sync {
    /// Takes everything captured so far, decoded lossily and trimmed.
    ///
    /// Returns an empty string when nothing was captured.
    fn drain_utf8(&self) -> String;
}

/// Redirects the process standard streams for the worker's lifetime.
///
/// Implementations must be idempotent in [`StdioIsolation::release`].
pub trait StdioIsolation: Send {
    /// Hands over the protocol streams. Only the first call succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::StreamsTaken`] on repeated calls.
    fn take_protocol_streams(&mut self) -> Result<ProtocolStreams, IsolationError>;

    /// Shared handle to the stray-output buffer.
    fn capture(&self) -> Arc<dyn CapturedOutput>;

    /// Restores the original streams.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError`] if a descriptor could not be restored.
    fn release(&mut self) -> Result<(), IsolationError>;
}

#[cfg(test)]
mod tests;
