//! Test harness utilities for driving a worker over in-memory streams.

use std::env;
use std::io::{self, Cursor, PipeWriter, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bobbin_config::Config;
use bobbin_protocol::{RequestWriter, ResponseReader, WireFormat, WorkRequest, WorkResponse};

use crate::executor::{TaskContext, TaskError, TaskExecutor};
use crate::stdio::{CapturedOutput, IsolationError, ProtocolStreams, StdioIsolation};
use crate::worker::{Worker, WorkerError, WorkerExit};

/// How long tests wait for asynchronous worker activity.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Names the single test a re-executed test binary should run.
const OWN_PROCESS_ENV: &str = "BOBBIN_OWN_PROCESS_TEST";

/// Growable byte sink shared between the worker and the test.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    format: WireFormat,
}

impl SharedBuffer {
    pub fn new(format: WireFormat) -> Self {
        Self {
            bytes: Arc::default(),
            format,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Everything written so far, decoded lossily for substring checks.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Decodes every complete frame written so far.
    pub fn responses(&self) -> Vec<WorkResponse> {
        let mut reader = ResponseReader::new(Cursor::new(self.bytes()), self.format, usize::MAX);
        let mut responses = Vec::new();
        while let Some(response) = reader
            .read_response()
            .expect("protocol output holds only response frames")
        {
            responses.push(response);
        }
        responses
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stray-output buffer that tests write to directly.
#[derive(Debug, Default)]
pub struct MemoryCapture {
    text: Mutex<String>,
}

impl MemoryCapture {
    pub fn write_stray(&self, text: &str) {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }
}

impl CapturedOutput for MemoryCapture {
    fn drain_utf8(&self) -> String {
        let mut text = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *text).trim().to_owned()
    }
}

/// Isolation double backed by a pipe and a shared buffer.
pub struct MemoryIsolation {
    streams: Option<ProtocolStreams>,
    capture: Arc<dyn CapturedOutput>,
    released: Arc<AtomicBool>,
}

impl StdioIsolation for MemoryIsolation {
    fn take_protocol_streams(&mut self) -> Result<ProtocolStreams, IsolationError> {
        self.streams.take().ok_or(IsolationError::StreamsTaken)
    }

    fn capture(&self) -> Arc<dyn CapturedOutput> {
        Arc::clone(&self.capture)
    }

    fn release(&mut self) -> Result<(), IsolationError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Configuration used by the harness unless a test supplies its own.
pub fn test_config() -> Config {
    Config {
        drain_timeout_secs: 30,
        ..Config::default()
    }
}

/// A worker running on a background thread with pipe-backed streams.
pub struct WorkerHarness {
    input: Option<RequestWriter<PipeWriter>>,
    output: SharedBuffer,
    released: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<WorkerExit, WorkerError>>>,
}

impl WorkerHarness {
    pub fn start(executor: impl TaskExecutor + 'static) -> Self {
        Self::start_with(test_config(), Arc::new(MemoryCapture::default()), executor)
    }

    pub fn start_with(
        config: Config,
        capture: Arc<dyn CapturedOutput>,
        executor: impl TaskExecutor + 'static,
    ) -> Self {
        let (reader, writer) = io::pipe().expect("create request pipe");
        let format = config.wire_format();
        let output = SharedBuffer::new(format);
        let released = Arc::new(AtomicBool::new(false));
        let mut isolation = MemoryIsolation {
            streams: Some(ProtocolStreams {
                input: Box::new(reader),
                output: Box::new(output.clone()),
            }),
            capture,
            released: Arc::clone(&released),
        };
        let worker = Worker::new(config, executor);
        let handle = thread::spawn(move || worker.run(&mut isolation));
        Self {
            input: Some(RequestWriter::new(writer, format)),
            output,
            released,
            handle: Some(handle),
        }
    }

    fn input(&mut self) -> &mut RequestWriter<PipeWriter> {
        self.input.as_mut().expect("request stream still open")
    }

    pub fn send(&mut self, request: &WorkRequest) {
        self.input()
            .write_request(request)
            .expect("write request frame");
    }

    /// Writes bytes that bypass the request encoder.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        let input = self.input().get_mut();
        input.write_all(bytes).expect("write raw bytes");
        input.flush().expect("flush raw bytes");
    }

    pub fn close_input(&mut self) {
        self.input = None;
    }

    pub fn output(&self) -> &SharedBuffer {
        &self.output
    }

    /// Waits until at least `count` responses have been written.
    pub fn wait_for_responses(&self, count: usize) -> Vec<WorkResponse> {
        let deadline = Instant::now() + PATIENCE;
        loop {
            let responses = self.output.responses();
            if responses.len() >= count {
                return responses;
            }
            assert!(
                Instant::now() < deadline,
                "expected {count} responses, got {}: {responses:?}",
                responses.len()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Waits for the worker to stop without closing the request stream.
    pub fn join(&mut self) -> WorkerExit {
        let handle = self.handle.take().expect("worker joined once");
        let deadline = Instant::now() + PATIENCE;
        while !handle.is_finished() {
            assert!(Instant::now() < deadline, "worker did not stop");
            thread::sleep(Duration::from_millis(5));
        }
        handle
            .join()
            .expect("worker thread")
            .expect("worker runs without setup errors")
    }

    /// Closes the request stream and waits for the worker to stop.
    pub fn finish(&mut self) -> WorkerExit {
        self.close_input();
        self.join()
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerHarness {
    fn drop(&mut self) {
        self.close_input();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Pins a closure to the executor signature so its argument types infer.
pub fn task_fn<F>(task: F) -> F
where
    F: Fn(&WorkRequest, &TaskContext, &mut String) -> Result<i32, TaskError> + Send + Sync + 'static,
{
    task
}

/// Polls `condition` until it holds.
pub fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + PATIENCE;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Runs the named test alone in a fresh copy of the test binary.
///
/// Returns `true` inside that copy, where the caller runs its body, and
/// `false` in the launching process once the copy has passed. Tests that
/// rewire the process's standard descriptors go through here so concurrently
/// running tests and libtest's own reporting keep their streams.
pub fn run_in_own_process(test_name: &str) -> bool {
    if env::var_os(OWN_PROCESS_ENV).is_some_and(|name| name == test_name) {
        return true;
    }
    let binary = env::current_exe().expect("locate the test binary");
    let outcome = Command::new(binary)
        .args([test_name, "--exact", "--test-threads=1"])
        .env(OWN_PROCESS_ENV, test_name)
        .stdin(Stdio::null())
        .output()
        .expect("re-run the test binary");
    assert!(
        outcome.status.success(),
        "{test_name} failed in its own process ({}):\n{}\n{}",
        outcome.status,
        String::from_utf8_lossy(&outcome.stdout),
        String::from_utf8_lossy(&outcome.stderr)
    );
    false
}
