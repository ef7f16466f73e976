use std::sync::Arc;

use bobbin_protocol::WorkRequest;

use crate::lifecycle::{RequestCell, RunnerId};

/// Per-request view handed to a [`super::TaskExecutor`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    runner: RunnerId,
    verbosity: i32,
    sandbox_dir: Option<String>,
    cell: Arc<RequestCell>,
}

impl TaskContext {
    pub(crate) fn new(request: &WorkRequest, runner: RunnerId, cell: Arc<RequestCell>) -> Self {
        Self {
            runner,
            verbosity: request.verbosity(),
            sandbox_dir: request.sandbox_dir().map(str::to_owned),
            cell,
        }
    }

    /// Id of the request being executed.
    #[must_use]
    pub fn request_id(&self) -> i32 {
        self.cell.request_id()
    }

    /// Pool thread running the request.
    #[must_use]
    pub const fn runner(&self) -> RunnerId {
        self.runner
    }

    /// Verbosity requested by the build tool.
    #[must_use]
    pub const fn verbosity(&self) -> i32 {
        self.verbosity
    }

    /// Sandbox directory the task must resolve inputs against, if any.
    #[must_use]
    pub fn sandbox_dir(&self) -> Option<&str> {
        self.sandbox_dir.as_deref()
    }

    /// Whether the build tool has withdrawn the request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// Registers a callback run once if the request is cancelled.
    ///
    /// The callback runs on the reader thread and must not block. It is
    /// advisory: the worker discards the result of a cancelled request
    /// whether or not the executor reacts.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        self.cell.on_cancel(callback);
    }
}
