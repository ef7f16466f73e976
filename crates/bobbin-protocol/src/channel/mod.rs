//! Framed reading and writing of protocol messages.
//!
//! In [`WireFormat::Proto`](crate::WireFormat::Proto) mode each frame is a
//! protobuf message preceded by its length as a varint; in
//! [`WireFormat::Json`](crate::WireFormat::Json) mode each frame is one JSON
//! object followed by a newline. Readers bound the size of each frame so a
//! runaway peer cannot exhaust memory, and writers flush after every frame,
//! including when the write itself failed part-way.

mod reader;
mod writer;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use self::reader::{FrameReader, RequestReader, ResponseReader};
pub use self::writer::{FrameWriter, RequestWriter, ResponseWriter};

/// A message that can travel in either wire encoding.
pub trait WireMessage: prost::Message + Default + Serialize + DeserializeOwned {}

impl<T> WireMessage for T where T: prost::Message + Default + Serialize + DeserializeOwned {}
