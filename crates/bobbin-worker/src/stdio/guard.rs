//! Descriptor-level redirection of the standard streams.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::capture::PipeCapture;
use super::errors::IsolationError;
use super::{CapturedOutput, ProtocolStreams, STDIO_TARGET, StdioIsolation};

/// Interval at which the pump thread empties the capture pipe.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

static GUARD_ACTIVE: AtomicBool = AtomicBool::new(false);

struct SavedStdio {
    stdin: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
}

impl SavedStdio {
    fn capture() -> Result<Self, IsolationError> {
        Ok(Self {
            stdin: duplicate(io::stdin().as_fd(), "stdin")?,
            stdout: duplicate(io::stdout().as_fd(), "stdout")?,
            stderr: duplicate(io::stderr().as_fd(), "stderr")?,
        })
    }

    fn restore(&self) -> Result<(), IsolationError> {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let mut outcome = Ok(());
        for (saved, target, stream) in [
            (&self.stdin, libc::STDIN_FILENO, "stdin"),
            (&self.stdout, libc::STDOUT_FILENO, "stdout"),
            (&self.stderr, libc::STDERR_FILENO, "stderr"),
        ] {
            if let Err(source) = redirect(saved.as_fd(), target) {
                outcome = Err(IsolationError::Restore { stream, source });
            }
        }
        outcome
    }
}

/// Process-wide redirection of descriptors 0, 1 and 2.
///
/// On acquisition the original stdin and stdout are duplicated and handed
/// out as the protocol streams, stdin is pointed at `/dev/null`, and stdout
/// and stderr are pointed at a capture pipe. Only one guard may exist at a
/// time. Dropping the guard restores the original descriptors.
pub struct StdioGuard {
    saved: Option<SavedStdio>,
    protocol: Option<ProtocolStreams>,
    capture: Arc<PipeCapture>,
    stop_pump: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StdioGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioGuard")
            .field("active", &self.saved.is_some())
            .finish_non_exhaustive()
    }
}

impl StdioGuard {
    /// Redirects the standard streams.
    ///
    /// # Errors
    ///
    /// Returns [`IsolationError::AlreadyActive`] if another guard is live, or
    /// the OS error that stopped the redirection. Descriptors already
    /// redirected are restored before the error is returned.
    pub fn acquire() -> Result<Self, IsolationError> {
        if GUARD_ACTIVE.swap(true, Ordering::AcqRel) {
            return Err(IsolationError::AlreadyActive);
        }
        Self::redirect_streams().inspect_err(|_| GUARD_ACTIVE.store(false, Ordering::Release))
    }

    fn redirect_streams() -> Result<Self, IsolationError> {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let saved = SavedStdio::capture()?;
        let input = File::from(duplicate(saved.stdin.as_fd(), "stdin")?);
        let output = File::from(duplicate(saved.stdout.as_fd(), "stdout")?);
        let null = File::open("/dev/null").map_err(IsolationError::NullDevice)?;
        let (reader, writer) = io::pipe().map_err(IsolationError::Pipe)?;
        let capture = Arc::new(PipeCapture::new(reader)?);

        let redirected = [
            (null.as_fd(), libc::STDIN_FILENO, "stdin"),
            (writer.as_fd(), libc::STDOUT_FILENO, "stdout"),
            (writer.as_fd(), libc::STDERR_FILENO, "stderr"),
        ]
        .into_iter()
        .try_for_each(|(source_fd, target, stream)| {
            redirect(source_fd, target)
                .map_err(|source| IsolationError::Redirect { stream, source })
        });
        if let Err(error) = redirected {
            if let Err(restore_error) = saved.restore() {
                warn!(
                    target: STDIO_TARGET,
                    %restore_error,
                    "failed to undo partial stream redirection"
                );
            }
            return Err(error);
        }
        // Descriptors 1 and 2 now hold the write end open.
        drop(writer);

        let stop_pump = Arc::new(AtomicBool::new(false));
        let pump = spawn_pump(Arc::clone(&capture), Arc::clone(&stop_pump));
        let mut guard = Self {
            saved: Some(saved),
            protocol: Some(ProtocolStreams {
                input: Box::new(input),
                output: Box::new(output),
            }),
            capture,
            stop_pump,
            pump: None,
        };
        match pump {
            Ok(handle) => {
                guard.pump = Some(handle);
                debug!(target: STDIO_TARGET, "standard streams isolated");
                Ok(guard)
            }
            Err(error) => {
                // `guard` restores the descriptors when dropped.
                Err(IsolationError::Pump(error))
            }
        }
    }
}

impl StdioIsolation for StdioGuard {
    fn take_protocol_streams(&mut self) -> Result<ProtocolStreams, IsolationError> {
        self.protocol.take().ok_or(IsolationError::StreamsTaken)
    }

    fn capture(&self) -> Arc<dyn CapturedOutput> {
        Arc::clone(&self.capture) as Arc<dyn CapturedOutput>
    }

    fn release(&mut self) -> Result<(), IsolationError> {
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        let restored = saved.restore();
        self.stop_pump.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take()
            && pump.join().is_err()
        {
            warn!(target: STDIO_TARGET, "capture pump thread panicked");
        }
        let leftover = self.capture.drain_utf8();
        if !leftover.is_empty() {
            debug!(
                target: STDIO_TARGET,
                bytes = leftover.len(),
                "discarding unattributed stray output"
            );
        }
        GUARD_ACTIVE.store(false, Ordering::Release);
        restored
    }
}

impl Drop for StdioGuard {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            warn!(target: STDIO_TARGET, %error, "failed to restore standard streams");
        }
    }
}

fn spawn_pump(capture: Arc<PipeCapture>, stop: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("bobbin-stdio-pump".to_owned())
        .spawn(move || {
            while !stop.load(Ordering::Acquire) && !capture.is_closed() {
                capture.pump();
                thread::sleep(PUMP_INTERVAL);
            }
        })
}

fn duplicate(fd: BorrowedFd<'_>, stream: &'static str) -> Result<OwnedFd, IsolationError> {
    fd.try_clone_to_owned()
        .map_err(|source| IsolationError::Duplicate { stream, source })
}

fn redirect(source: BorrowedFd<'_>, target: RawFd) -> io::Result<()> {
    // SAFETY: `source` is borrowed for the duration of the call and `target`
    // is one of the standard descriptors; dup2 atomically replaces the table
    // entry without touching any Rust-owned handle.
    let result = unsafe { libc::dup2(source.as_raw_fd(), target) };
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
