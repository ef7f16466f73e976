//! Runs one admitted request on a pool thread and answers it.

mod panic;

use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use bobbin_protocol::{ResponseWriter, WireFormat, WorkRequest, WorkResponse};
use tracing::{debug, error, warn};

pub(crate) use self::panic::PanicHookGuard;
use self::panic::{TaskScope, render_panic};
use crate::executor::{TaskContext, TaskError, TaskExecutor};
use crate::lifecycle::{ActiveRequests, RequestCell, RequestState, RunnerId, StartOutcome};
use crate::shutdown::WorkerShutdown;
use crate::stdio::CapturedOutput;

pub(crate) const EXECUTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::execution");

/// Serialises response frames onto the protocol output.
pub(crate) struct ResponseSink {
    writer: Mutex<ResponseWriter<Box<dyn Write + Send>>>,
}

impl ResponseSink {
    pub(crate) fn new(output: Box<dyn Write + Send>, format: WireFormat) -> Self {
        Self {
            writer: Mutex::new(ResponseWriter::new(output, format)),
        }
    }

    /// Writes `response` as one frame. Failures are logged, not returned.
    pub(crate) fn emit(&self, response: &WorkResponse) -> bool {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.write_response(response) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    target: EXECUTION_TARGET,
                    request_id = response.request_id(),
                    %error,
                    "failed to write response"
                );
                false
            }
        }
    }
}

/// Removes the request from the active table once its response is out.
struct EntryRelease<'a> {
    requests: &'a ActiveRequests,
    request_id: i32,
}

impl Drop for EntryRelease<'_> {
    fn drop(&mut self) {
        self.requests.remove(self.request_id);
    }
}

/// Shared collaborators every task thread needs.
pub(crate) struct TaskRunner {
    executor: Arc<dyn TaskExecutor>,
    requests: Arc<ActiveRequests>,
    capture: Arc<dyn CapturedOutput>,
    responses: Arc<ResponseSink>,
    shutdown: Arc<WorkerShutdown>,
}

impl TaskRunner {
    pub(crate) fn new(
        executor: Arc<dyn TaskExecutor>,
        requests: Arc<ActiveRequests>,
        capture: Arc<dyn CapturedOutput>,
        responses: Arc<ResponseSink>,
        shutdown: Arc<WorkerShutdown>,
    ) -> Self {
        Self {
            executor,
            requests,
            capture,
            responses,
            shutdown,
        }
    }

    /// Executes `request` and writes exactly one response for it.
    ///
    /// A request already claimed by another runner is left alone.
    pub(crate) fn run(&self, request: &WorkRequest, cell: Arc<RequestCell>, runner: RunnerId) {
        let request_id = request.request_id();
        let outcome = cell.start(runner);
        if let StartOutcome::Rejected(state) = outcome {
            error!(
                target: EXECUTION_TARGET,
                request_id,
                %runner,
                ?state,
                "request was already claimed; not running it again"
            );
            return;
        }

        let _release = EntryRelease {
            requests: &self.requests,
            request_id,
        };
        let (response, fatal) = match outcome {
            StartOutcome::CancelledBeforeStart => {
                debug!(target: EXECUTION_TARGET, request_id, "cancelled before start");
                (WorkResponse::cancelled(request_id), None)
            }
            _ => self.execute(request, cell, runner),
        };
        self.responses.emit(&response);
        if let Some(reason) = fatal {
            self.shutdown.request_fatal(reason);
        }
    }

    fn execute(
        &self,
        request: &WorkRequest,
        cell: Arc<RequestCell>,
        runner: RunnerId,
    ) -> (WorkResponse, Option<String>) {
        let request_id = request.request_id();
        let context = TaskContext::new(request, runner, Arc::clone(&cell));
        let mut output = String::new();

        let result = {
            let _scope = TaskScope::enter();
            catch_unwind(AssertUnwindSafe(|| {
                self.executor.execute(request, &context, &mut output)
            }))
        };

        let mut fatal = None;
        let exit_code = match result {
            Ok(Ok(code)) => code,
            Ok(Err(TaskError::Interrupted)) => {
                debug!(target: EXECUTION_TARGET, request_id, "task interrupted");
                output.clear();
                1
            }
            Ok(Err(task_error)) => {
                if task_error.is_fatal() {
                    error!(target: EXECUTION_TARGET, request_id, error = %task_error, "task failed fatally");
                    fatal = Some(format!("request {request_id}: {task_error}"));
                } else {
                    debug!(target: EXECUTION_TARGET, request_id, error = %task_error, "task failed");
                }
                append_line(&mut output, &task_error.render());
                1
            }
            Err(payload) => {
                warn!(target: EXECUTION_TARGET, request_id, "task panicked");
                append_line(&mut output, &render_panic(payload.as_ref()));
                1
            }
        };

        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let stray = self.capture.drain_utf8();
        if !stray.is_empty() {
            append_line(&mut output, &stray);
        }

        let response = match cell.finish() {
            RequestState::Cancelled => {
                debug!(target: EXECUTION_TARGET, request_id, "cancelled while running; result discarded");
                WorkResponse::cancelled(request_id)
            }
            _ => WorkResponse::completed(request_id, exit_code, output),
        };
        (response, fatal)
    }
}

fn append_line(output: &mut String, text: &str) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(text);
}
