//! Errors raised while reading or writing protocol frames.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Failures on the protocol channel.
///
/// Every read-side variant is unrecoverable: once a frame cannot be decoded
/// the byte stream can no longer be trusted to be aligned on message
/// boundaries.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reading from or writing to the underlying stream failed.
    #[error("protocol stream I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A frame could not be decoded as a message.
    #[error("malformed frame: {message}")]
    Malformed {
        /// Human-readable description of the decoding failure.
        message: String,
        /// Underlying decoder error, when decoding reached a parser.
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// A frame exceeded the configured size limit.
    #[error("frame of at least {size} bytes exceeds the {max_size} byte limit")]
    FrameTooLarge {
        /// Bytes declared or read before the limit tripped.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },

    /// A message could not be serialised.
    #[error("failed to serialise message: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Creates a malformed-frame error from a JSON decoding failure.
    #[must_use]
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a malformed-frame error from a protobuf decoding failure.
    #[must_use]
    pub fn from_decode_error(source: prost::DecodeError) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a malformed-frame error with a custom message.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }
}
