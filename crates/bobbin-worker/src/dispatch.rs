//! Reader loop: pulls frames off the protocol input and routes them.

use std::io::BufRead;
use std::sync::Arc;

use bobbin_protocol::{ProtocolError, RequestReader, WorkRequest, WorkResponse};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::execution::{ResponseSink, TaskRunner};
use crate::lifecycle::{ActiveRequests, LifecycleError};
use crate::pool::TaskPool;
use crate::shutdown::WorkerShutdown;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Failures that end the reader loop and the worker with it.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request stream failed or carried an undecodable frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The build tool broke the admission rules.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Routes requests from the protocol input to the task pool.
pub(crate) struct Dispatcher {
    requests: Arc<ActiveRequests>,
    pool: Arc<TaskPool>,
    runner: Arc<TaskRunner>,
    responses: Arc<ResponseSink>,
    shutdown: Arc<WorkerShutdown>,
}

impl Dispatcher {
    pub(crate) const fn new(
        requests: Arc<ActiveRequests>,
        pool: Arc<TaskPool>,
        runner: Arc<TaskRunner>,
        responses: Arc<ResponseSink>,
        shutdown: Arc<WorkerShutdown>,
    ) -> Self {
        Self {
            requests,
            pool,
            runner,
            responses,
            shutdown,
        }
    }

    /// Serves frames until end-of-stream, a fatal error, or shutdown.
    pub(crate) fn run<R: BufRead>(&self, mut reader: RequestReader<R>) -> Result<(), DispatchError> {
        loop {
            if self.shutdown.is_stopping() {
                debug!(target: DISPATCH_TARGET, "worker stopping; reader exits");
                return Ok(());
            }
            let Some(request) = reader.read_request()? else {
                info!(target: DISPATCH_TARGET, "request stream closed");
                return Ok(());
            };
            if request.is_cancel() {
                self.requests.cancel(request.request_id());
            } else {
                self.admit(request)?;
            }
        }
    }

    fn admit(&self, request: WorkRequest) -> Result<(), DispatchError> {
        let request_id = request.request_id();
        if self.shutdown.is_stopping() {
            debug!(target: DISPATCH_TARGET, request_id, "worker stopping; request dropped");
            return Ok(());
        }
        let cell = match self
            .requests
            .admit(request_id, || self.shutdown.is_stopping())
        {
            Ok(cell) => cell,
            Err(LifecycleError::Interrupted) => return Ok(()),
            Err(error) => return Err(error.into()),
        };

        if request.is_verbose() {
            info!(
                target: DISPATCH_TARGET,
                request_id,
                arguments = ?request.arguments(),
                inputs = request.inputs().len(),
                sandbox_dir = request.sandbox_dir(),
                "request admitted"
            );
        } else {
            debug!(target: DISPATCH_TARGET, request_id, "request admitted");
        }

        let runner = Arc::clone(&self.runner);
        let scheduled = self
            .pool
            .spawn(format!("bobbin-task-{request_id}"), move |runner_id| {
                runner.run(&request, cell, runner_id);
            });
        if let Err(error) = scheduled {
            warn!(target: DISPATCH_TARGET, request_id, %error, "could not schedule request");
            self.responses.emit(&WorkResponse::completed(
                request_id,
                1,
                format!("worker could not schedule the request: {error}"),
            ));
            self.requests.remove(request_id);
        }
        Ok(())
    }
}
