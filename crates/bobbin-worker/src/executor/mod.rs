//! Pluggable task execution.
//!
//! A [`TaskExecutor`] turns one [`WorkRequest`] into an exit code plus the
//! text the build tool shows to the user. The worker owns scheduling,
//! cancellation and response framing; executors only do the work.

mod context;
mod echo;
mod errors;

use bobbin_protocol::WorkRequest;

pub use context::TaskContext;
pub use echo::EchoExecutor;
pub use errors::TaskError;

/// Executes work requests on behalf of the worker.
///
/// Implementations are shared between pool threads and must tolerate
/// concurrent calls. Text appended to `output` becomes the response output.
pub trait TaskExecutor: Send + Sync {
    /// Runs `request` to completion and returns its exit code.
    ///
    /// Long-running executors should poll [`TaskContext::is_cancelled`] and
    /// return [`TaskError::Interrupted`] once the request is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the task fails. Ordinary failures become a
    /// response with exit code 1; [`TaskError::Fatal`] also stops the worker.
    fn execute(
        &self,
        request: &WorkRequest,
        context: &TaskContext,
        output: &mut String,
    ) -> Result<i32, TaskError>;
}

impl<F> TaskExecutor for F
where
    F: Fn(&WorkRequest, &TaskContext, &mut String) -> Result<i32, TaskError> + Send + Sync,
{
    fn execute(
        &self,
        request: &WorkRequest,
        context: &TaskContext,
        output: &mut String,
    ) -> Result<i32, TaskError> {
        self(request, context, output)
    }
}
