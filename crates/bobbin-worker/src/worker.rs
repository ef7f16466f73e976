//! Worker coordinator: run, drain and clean up.

use std::io::BufReader;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bobbin_config::Config;
use bobbin_protocol::RequestReader;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::execution::{PanicHookGuard, ResponseSink, TaskRunner};
use crate::executor::TaskExecutor;
use crate::lifecycle::ActiveRequests;
use crate::pool::TaskPool;
use crate::shutdown::{ShutdownError, SignalWatcher, Wake, WorkerShutdown};
use crate::stdio::{IsolationError, ProtocolStreams, StdioIsolation};

/// Slice of the drain bound spent waiting before re-checking for fatal
/// failures.
const DRAIN_POLL: Duration = Duration::from_millis(100);

pub(crate) const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

/// Errors that stop the worker before or after serving.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Stream isolation failed.
    #[error(transparent)]
    Isolation(#[from] IsolationError),
    /// Termination handling could not be installed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The reader thread could not be spawned.
    #[error("failed to spawn reader thread: {0}")]
    SpawnReader(#[source] std::io::Error),
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The request stream closed and every request was answered.
    Drained,
    /// The request stream closed but some tasks outlived the drain bound.
    DrainTimedOut {
        /// Tasks still running when the worker gave up on them.
        abandoned: usize,
    },
    /// A termination signal stopped the worker.
    Interrupted {
        /// Signal number received.
        signal: i32,
    },
    /// An unrecoverable failure stopped the worker.
    Fatal {
        /// Description of the failure.
        reason: String,
    },
}

impl WorkerExit {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Drained | Self::DrainTimedOut { .. } | Self::Interrupted { .. } => {
                ExitCode::SUCCESS
            }
            Self::Fatal { .. } => ExitCode::FAILURE,
        }
    }
}

/// Persistent worker serving requests with one executor.
pub struct Worker {
    config: Config,
    executor: Arc<dyn TaskExecutor>,
    watch_signals: bool,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("watch_signals", &self.watch_signals)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates a worker that does not react to termination signals.
    #[must_use]
    pub fn new(config: Config, executor: impl TaskExecutor + 'static) -> Self {
        Self {
            config,
            executor: Arc::new(executor),
            watch_signals: false,
        }
    }

    /// Enables SIGTERM, SIGINT, SIGQUIT and SIGHUP handling for the run.
    #[must_use]
    pub const fn with_signal_watch(mut self, enabled: bool) -> Self {
        self.watch_signals = enabled;
        self
    }

    /// Serves requests until the stream closes, a fatal failure occurs or a
    /// termination signal arrives.
    ///
    /// `isolation` is released on every path before this returns.
    ///
    /// After a fatal failure or a termination signal the reader thread may
    /// still be blocked on the protocol input when this returns. It exits at
    /// the next frame or end-of-stream and admits no further requests, so
    /// nothing more is written to the protocol output.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the worker could not start serving or the
    /// original streams could not be restored.
    pub fn run(&self, isolation: &mut dyn StdioIsolation) -> Result<WorkerExit, WorkerError> {
        let served = match isolation.take_protocol_streams() {
            Ok(streams) => self.serve(streams, &*isolation),
            Err(error) => Err(error.into()),
        };
        let released = isolation.release();
        let exit = served?;
        released?;
        Ok(exit)
    }

    fn serve(
        &self,
        streams: ProtocolStreams,
        isolation: &dyn StdioIsolation,
    ) -> Result<WorkerExit, WorkerError> {
        let _panic_hook = PanicHookGuard::install();
        let shutdown = Arc::new(WorkerShutdown::new());
        let _signals = if self.watch_signals {
            Some(SignalWatcher::install(Arc::clone(&shutdown))?)
        } else {
            None
        };

        let requests = Arc::new(ActiveRequests::new());
        let pool = Arc::new(TaskPool::new());
        let format = self.config.wire_format();
        let responses = Arc::new(ResponseSink::new(streams.output, format));
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&self.executor),
            Arc::clone(&requests),
            isolation.capture(),
            Arc::clone(&responses),
            Arc::clone(&shutdown),
        ));
        let dispatcher = Dispatcher::new(
            requests,
            Arc::clone(&pool),
            runner,
            responses,
            Arc::clone(&shutdown),
        );
        let reader = RequestReader::new(
            BufReader::new(streams.input),
            format,
            self.config.max_frame_bytes(),
        );

        let reader_shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("bobbin-reader".to_owned())
            .spawn(move || {
                let outcome = dispatcher.run(reader);
                reader_shutdown.reader_finished(outcome);
            })
            .map_err(WorkerError::SpawnReader)?;
        info!(target: WORKER_TARGET, "worker serving requests");

        let exit = match shutdown.wait() {
            Wake::ReaderFinished(Ok(())) => self.drain(&pool, &shutdown, WorkerExit::Drained),
            Wake::Interrupted(signal) => {
                self.drain(&pool, &shutdown, WorkerExit::Interrupted { signal })
            }
            Wake::ReaderFinished(Err(failure)) => {
                error!(target: WORKER_TARGET, error = %failure, "request stream failed");
                WorkerExit::Fatal {
                    reason: failure.to_string(),
                }
            }
            Wake::Fatal(reason) => {
                error!(target: WORKER_TARGET, %reason, "stopping after fatal task failure");
                WorkerExit::Fatal { reason }
            }
        };
        // Anything still running is abandoned; the process exits shortly.
        if !pool.is_terminated() {
            pool.shutdown_now();
        }
        info!(target: WORKER_TARGET, ?exit, "worker stopped");
        Ok(exit)
    }

    /// Waits for in-flight tasks up to the configured bound.
    fn drain(&self, pool: &TaskPool, shutdown: &WorkerShutdown, exit: WorkerExit) -> WorkerExit {
        pool.shutdown();
        let deadline = Instant::now() + self.config.drain_timeout();
        loop {
            if let Some(reason) = shutdown.fatal_reason() {
                return WorkerExit::Fatal { reason };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if pool.await_termination(remaining.min(DRAIN_POLL)) {
                return shutdown
                    .fatal_reason()
                    .map_or(exit, |reason| WorkerExit::Fatal { reason });
            }
            if Instant::now() >= deadline {
                let abandoned = pool.active();
                warn!(target: WORKER_TARGET, abandoned, "drain bound elapsed");
                return WorkerExit::DrainTimedOut { abandoned };
            }
        }
    }
}
