use std::io::{self, BufRead};
use std::marker::PhantomData;

use super::WireMessage;
use crate::error::ProtocolError;
use crate::format::WireFormat;
use crate::message::{WorkRequest, WorkResponse};

/// Longest varint a length prefix may occupy.
const MAX_PREFIX_BYTES: usize = 10;

/// Reads framed messages of type `M` from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R, M> {
    reader: R,
    format: WireFormat,
    max_frame_bytes: usize,
    message: PhantomData<fn() -> M>,
}

/// Worker side of the channel: reads what the build tool sends.
pub type RequestReader<R> = FrameReader<R, WorkRequest>;

/// Build-tool side of the channel: reads what the worker answers.
pub type ResponseReader<R> = FrameReader<R, WorkResponse>;

impl<R: BufRead, M: WireMessage> FrameReader<R, M> {
    /// Wraps `reader`, rejecting frames longer than `max_frame_bytes`.
    pub const fn new(reader: R, format: WireFormat, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            format,
            max_frame_bytes,
            message: PhantomData,
        }
    }

    /// Blocks until the next message arrives.
    ///
    /// Returns `Ok(None)` once the stream reaches end-of-file on a frame
    /// boundary. In JSON mode blank lines between frames are ignored and a
    /// final frame without a trailing newline is still decoded.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the stream fails, a frame exceeds the
    /// size limit, the stream ends inside a frame, or a frame does not decode.
    pub fn read_message(&mut self) -> Result<Option<M>, ProtocolError> {
        match self.format {
            WireFormat::Proto => self.read_delimited(),
            WireFormat::Json => self.read_json(),
        }
    }

    fn read_delimited(&mut self) -> Result<Option<M>, ProtocolError> {
        let Some(size) = self.read_length_prefix()? else {
            return Ok(None);
        };
        if size > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max_size: self.max_frame_bytes,
            });
        }
        let mut body = vec![0; size];
        self.reader.read_exact(&mut body).map_err(|error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                ProtocolError::malformed(format!("stream ended inside a {size} byte frame"))
            } else {
                ProtocolError::Io(error)
            }
        })?;
        M::decode(body.as_slice())
            .map(Some)
            .map_err(ProtocolError::from_decode_error)
    }

    fn read_length_prefix(&mut self) -> Result<Option<usize>, ProtocolError> {
        let mut prefix = Vec::with_capacity(MAX_PREFIX_BYTES);
        loop {
            let Some(byte) = self.read_byte()? else {
                if prefix.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::malformed(
                    "stream ended inside a frame length prefix",
                ));
            };
            prefix.push(byte);
            if byte & 0x80 == 0 {
                return prost::decode_length_delimiter(prefix.as_slice())
                    .map(Some)
                    .map_err(ProtocolError::from_decode_error);
            }
            if prefix.len() >= MAX_PREFIX_BYTES {
                return Err(ProtocolError::malformed(
                    "frame length prefix exceeds ten bytes",
                ));
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        loop {
            match self.reader.fill_buf() {
                Ok(buffer) => {
                    let byte = buffer.first().copied();
                    if byte.is_some() {
                        self.reader.consume(1);
                    }
                    return Ok(byte);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(ProtocolError::Io(error)),
            }
        }
    }

    fn read_json(&mut self) -> Result<Option<M>, ProtocolError> {
        loop {
            let Some(frame) = self.read_line()? else {
                return Ok(None);
            };
            let trimmed = frame.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_slice(trimmed)
                .map(Some)
                .map_err(ProtocolError::from_json_error);
        }
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut frame = Vec::new();
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buffer) => buffer,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(ProtocolError::Io(error)),
            };

            if available.is_empty() {
                return Ok((!frame.is_empty()).then_some(frame));
            }

            let (chunk, complete) = match available.iter().position(|byte| *byte == b'\n') {
                Some(newline) => (available.get(..=newline).unwrap_or(available), true),
                None => (available, false),
            };
            let consumed = chunk.len();
            let size = frame.len().saturating_add(consumed);
            if size > self.max_frame_bytes {
                return Err(ProtocolError::FrameTooLarge {
                    size,
                    max_size: self.max_frame_bytes,
                });
            }
            frame.extend_from_slice(chunk);
            self.reader.consume(consumed);

            if complete {
                return Ok(Some(frame));
            }
        }
    }
}

impl<R: BufRead> FrameReader<R, WorkRequest> {
    /// Blocks until the next request arrives; see [`FrameReader::read_message`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the next frame cannot be read.
    pub fn read_request(&mut self) -> Result<Option<WorkRequest>, ProtocolError> {
        self.read_message()
    }
}

impl<R: BufRead> FrameReader<R, WorkResponse> {
    /// Blocks until the next response arrives; see [`FrameReader::read_message`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the next frame cannot be read.
    pub fn read_response(&mut self) -> Result<Option<WorkResponse>, ProtocolError> {
        self.read_message()
    }
}
