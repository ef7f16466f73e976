use std::io;

use thiserror::Error;

/// Errors raised while redirecting or restoring the standard streams.
#[derive(Debug, Error)]
pub enum IsolationError {
    /// Another guard already owns the process streams.
    #[error("standard streams are already isolated")]
    AlreadyActive,
    /// The protocol streams were handed out before.
    #[error("protocol streams were already taken")]
    StreamsTaken,
    /// Duplicating a standard descriptor failed.
    #[error("failed to duplicate {stream}: {source}")]
    Duplicate {
        /// Name of the stream being duplicated.
        stream: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Creating the capture pipe failed.
    #[error("failed to create capture pipe: {0}")]
    Pipe(#[source] io::Error),
    /// Opening the null device for stdin failed.
    #[error("failed to open /dev/null: {0}")]
    NullDevice(#[source] io::Error),
    /// Replacing a standard descriptor failed.
    #[error("failed to redirect {stream}: {source}")]
    Redirect {
        /// Name of the stream being redirected.
        stream: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Restoring an original descriptor failed.
    #[error("failed to restore {stream}: {source}")]
    Restore {
        /// Name of the stream being restored.
        stream: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The capture pump thread could not be spawned.
    #[error("failed to spawn capture pump: {0}")]
    Pump(#[source] io::Error),
}
