//! Wire encodings understood by the channel.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How messages are framed on the protocol streams.
///
/// The build tool picks the encoding when it starts the worker; both ends
/// must agree for the lifetime of the process.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum WireFormat {
    /// Protocol buffer messages, each preceded by its varint-encoded length.
    #[default]
    Proto,
    /// One camelCase JSON object per line.
    Json,
}

/// Errors encountered while parsing a [`WireFormat`] from text.
pub type WireFormatParseError = strum::ParseError;
