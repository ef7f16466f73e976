use std::io::Write;
use std::marker::PhantomData;

use super::WireMessage;
use crate::error::ProtocolError;
use crate::format::WireFormat;
use crate::message::{WorkRequest, WorkResponse};

/// Serialises framed messages of type `M` onto a byte stream.
///
/// The writer is not synchronised; concurrent producers must serialise access
/// themselves so frames never interleave.
#[derive(Debug)]
pub struct FrameWriter<W, M> {
    writer: W,
    format: WireFormat,
    message: PhantomData<fn(M)>,
}

/// Worker side of the channel: answers the build tool.
pub type ResponseWriter<W> = FrameWriter<W, WorkResponse>;

/// Build-tool side of the channel: sends work to the worker.
pub type RequestWriter<W> = FrameWriter<W, WorkRequest>;

impl<W: Write, M: WireMessage> FrameWriter<W, M> {
    /// Creates a writer wrapping the given output stream.
    pub const fn new(writer: W, format: WireFormat) -> Self {
        Self {
            writer,
            format,
            message: PhantomData,
        }
    }

    /// Writes one frame and flushes the stream.
    ///
    /// The frame is encoded in full before anything reaches the stream, and a
    /// flush is attempted even when the write fails, so the peer never waits
    /// on bytes stuck in a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if serialisation, writing or flushing fails.
    pub fn write_message(&mut self, message: &M) -> Result<(), ProtocolError> {
        let frame = self.encode(message)?;
        let written = self.writer.write_all(&frame);
        let flushed = self.writer.flush();
        written?;
        flushed?;
        Ok(())
    }

    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtocolError> {
        match self.format {
            WireFormat::Proto => Ok(message.encode_length_delimited_to_vec()),
            WireFormat::Json => {
                let mut frame = serde_json::to_vec(message).map_err(ProtocolError::Serialize)?;
                frame.push(b'\n');
                Ok(frame)
            }
        }
    }

    /// Mutable access to the wrapped stream, for writing unframed bytes.
    pub const fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameWriter<W, WorkResponse> {
    /// Writes one response frame; see [`FrameWriter::write_message`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if serialisation, writing or flushing fails.
    pub fn write_response(&mut self, response: &WorkResponse) -> Result<(), ProtocolError> {
        self.write_message(response)
    }
}

impl<W: Write> FrameWriter<W, WorkRequest> {
    /// Writes one request frame; see [`FrameWriter::write_message`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if serialisation, writing or flushing fails.
    pub fn write_request(&mut self, request: &WorkRequest) -> Result<(), ProtocolError> {
        self.write_message(request)
    }
}
