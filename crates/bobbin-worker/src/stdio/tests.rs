//! Tests for stream isolation.
//!
//! The guard rewires descriptors for the whole process, so the test that
//! needs a live guard runs in its own copy of the test binary.

use std::io::{self, Read, Write};

use super::*;
use crate::tests::support::run_in_own_process;

#[test]
fn pipe_capture_drains_trimmed_text() {
    let (reader, mut writer) = io::pipe().expect("pipe");
    let capture = PipeCapture::new(reader).expect("capture");

    writer.write_all(b"  first line\nsecond line\n\n").expect("write");
    assert_eq!(capture.drain_utf8(), "first line\nsecond line");
    assert_eq!(capture.drain_utf8(), "");
}

#[test]
fn pipe_capture_decodes_invalid_utf8_lossily() {
    let (reader, mut writer) = io::pipe().expect("pipe");
    let capture = PipeCapture::new(reader).expect("capture");

    writer.write_all(b"bad \xff byte").expect("write");
    assert_eq!(capture.drain_utf8(), "bad \u{fffd} byte");
}

#[test]
fn pipe_capture_notices_closed_writers() {
    let (reader, writer) = io::pipe().expect("pipe");
    let capture = PipeCapture::new(reader).expect("capture");
    drop(writer);
    capture.pump();
    assert!(capture.is_closed());
}

#[test]
fn guard_redirects_and_restores_standard_streams() {
    if !run_in_own_process("stdio::tests::guard_redirects_and_restores_standard_streams") {
        return;
    }
    let mut guard = StdioGuard::acquire().expect("acquire guard");
    assert!(matches!(
        StdioGuard::acquire(),
        Err(IsolationError::AlreadyActive)
    ));

    let mut streams = guard.take_protocol_streams().expect("protocol streams");
    assert!(matches!(
        guard.take_protocol_streams(),
        Err(IsolationError::StreamsTaken)
    ));

    {
        let mut stdout = io::stdout().lock();
        stdout.write_all(b"stray stdout text\n").expect("write stdout");
        stdout.flush().expect("flush stdout");
    }
    io::stderr()
        .write_all(b"stray stderr text\n")
        .expect("write stderr");

    let mut byte = [0_u8; 1];
    assert_eq!(
        io::stdin().lock().read(&mut byte).expect("read null stdin"),
        0,
        "stdin should read from /dev/null"
    );

    let captured = guard.capture().drain_utf8();
    assert!(captured.contains("stray stdout text"), "{captured}");
    assert!(captured.contains("stray stderr text"), "{captured}");

    streams.output.flush().expect("protocol output stays writable");
    guard.release().expect("release");
    guard.release().expect("release is idempotent");
    drop(guard);

    let again = StdioGuard::acquire().expect("guard can be re-acquired");
    drop(again);
}
