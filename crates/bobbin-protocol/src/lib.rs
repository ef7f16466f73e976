//! Wire protocol for the Bobbin persistent build worker.
//!
//! The worker speaks the Bazel persistent worker protocol over its original
//! standard input and output. By default every message is a protobuf
//! `WorkRequest` or `WorkResponse` preceded by its length as a varint, the
//! framing the build tool uses unless told otherwise. The JSON flavour, one
//! camelCase object per line, is available through [`WireFormat::Json`]:
//!
//! ```json
//! {"requestId":3,"arguments":["--flagfile=x.params"],"inputs":[{"path":"a.class"}]}
//! ```
//!
//! The worker answers each admitted request with exactly one response:
//!
//! ```json
//! {"requestId":3,"exitCode":0,"output":"","wasCancelled":false}
//! ```
//!
//! A request with `cancel` set is a notification that the build tool no
//! longer needs the result of the request with the same id; it never receives
//! a response of its own.
//!
//! Request id `0` marks a legacy singleplex request. At most one singleplex
//! request is active at any time.

pub mod channel;
mod error;
mod format;
mod message;

pub use self::channel::{
    FrameReader, FrameWriter, RequestReader, RequestWriter, ResponseReader, ResponseWriter,
    WireMessage,
};
pub use self::error::ProtocolError;
pub use self::format::{WireFormat, WireFormatParseError};
pub use self::message::{Input, SINGLEPLEX_REQUEST_ID, VERBOSE_THRESHOLD, WorkRequest, WorkResponse};
