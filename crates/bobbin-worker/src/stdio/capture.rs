//! Non-blocking capture of text written to the redirected descriptors.

use std::io::{self, PipeReader, Read};
use std::os::fd::AsRawFd;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use super::{CapturedOutput, STDIO_TARGET};
use super::errors::IsolationError;

const READ_CHUNK: usize = 8 * 1024;

struct CaptureState {
    reader: PipeReader,
    buffer: Vec<u8>,
    closed: bool,
}

/// Read end of the capture pipe plus the bytes pumped out of it so far.
///
/// The pipe is drained regularly by a pump thread so writers never block on
/// a full pipe, and once more on every [`CapturedOutput::drain_utf8`] call so
/// text written just before a request finished is attributed to it.
pub struct PipeCapture {
    state: Mutex<CaptureState>,
}

impl std::fmt::Debug for PipeCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeCapture").finish_non_exhaustive()
    }
}

impl PipeCapture {
    /// Wraps `reader`, switching it to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::Pipe`] if the descriptor flags cannot be
    /// changed.
    pub fn new(reader: PipeReader) -> Result<Self, IsolationError> {
        set_nonblocking(&reader).map_err(IsolationError::Pipe)?;
        Ok(Self {
            state: Mutex::new(CaptureState {
                reader,
                buffer: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Moves whatever is currently readable from the pipe into the buffer.
    pub fn pump(&self) {
        pump_locked(&mut self.lock());
    }

    /// Whether every write end of the pipe has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CapturedOutput for PipeCapture {
    fn drain_utf8(&self) -> String {
        let mut state = self.lock();
        pump_locked(&mut state);
        let bytes = std::mem::take(&mut state.buffer);
        String::from_utf8_lossy(&bytes).trim().to_owned()
    }
}

fn pump_locked(state: &mut CaptureState) {
    let mut chunk = [0_u8; READ_CHUNK];
    while !state.closed {
        match state.reader.read(&mut chunk) {
            Ok(0) => state.closed = true,
            Ok(read) => state.buffer.extend_from_slice(chunk.get(..read).unwrap_or_default()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
            Err(error) => {
                warn!(
                    target: STDIO_TARGET,
                    %error,
                    "reading captured output failed; capture stopped"
                );
                state.closed = true;
            }
        }
    }
}

fn set_nonblocking(reader: &PipeReader) -> io::Result<()> {
    let fd = reader.as_raw_fd();
    // SAFETY: `fd` belongs to `reader`, which outlives both calls; F_GETFL and
    // F_SETFL only touch the open file description's status flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    let updated = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if updated == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
