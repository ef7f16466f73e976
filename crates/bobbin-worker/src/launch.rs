//! Process entry contract for the worker binary.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;

use thiserror::Error;
use tracing::error;

use crate::bootstrap::{BootstrapError, ConfigLoader, bootstrap_with};
use crate::executor::TaskExecutor;
use crate::stdio::{IsolationError, StdioGuard};
use crate::worker::{WORKER_TARGET, Worker, WorkerError, WorkerExit};

/// Flag the build tool passes when it starts a persistent worker.
pub const PERSISTENT_WORKER_FLAG: &str = "--persistent_worker";

/// Errors that prevent the worker from serving.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The binary was started outside persistent worker mode.
    #[error("{program} only runs as a persistent worker; pass {PERSISTENT_WORKER_FLAG}")]
    NotPersistent {
        /// Program name used in the diagnostic.
        program: String,
    },
    /// Configuration or telemetry setup failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Stream isolation could not be established.
    #[error("failed to isolate standard streams: {0}")]
    Isolation(#[from] IsolationError),
    /// The worker failed outside request handling.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Whether `args` ask for persistent worker mode.
#[must_use]
pub fn is_persistent_worker(args: &[OsString]) -> bool {
    args.iter().skip(1).any(|argument| argument == PERSISTENT_WORKER_FLAG)
}

/// Runs the worker binary and maps the outcome to a process exit code.
///
/// Diagnostics for launch failures go to the real stderr, which is restored
/// before this returns.
pub fn run<E>(args: Vec<OsString>, loader: &dyn ConfigLoader, executor: E) -> ExitCode
where
    E: TaskExecutor + 'static,
{
    match launch(&args, loader, executor) {
        Ok(exit) => exit.exit_code(),
        Err(launch_error) => {
            error!(target: WORKER_TARGET, error = %launch_error, "worker failed to run");
            let _ = writeln!(io::stderr().lock(), "{launch_error}");
            ExitCode::FAILURE
        }
    }
}

/// Checks the launch contract, prepares the process and serves requests.
///
/// # Errors
///
/// Returns [`LaunchError`] when the contract is violated or setup fails.
pub fn launch<E>(
    args: &[OsString],
    loader: &dyn ConfigLoader,
    executor: E,
) -> Result<WorkerExit, LaunchError>
where
    E: TaskExecutor + 'static,
{
    if !is_persistent_worker(args) {
        let program = args
            .first()
            .map_or_else(|| env!("CARGO_PKG_NAME").to_owned(), |program| {
                program.to_string_lossy().into_owned()
            });
        return Err(LaunchError::NotPersistent { program });
    }

    let (config, _telemetry) = bootstrap_with(loader, args)?;
    let mut guard = StdioGuard::acquire()?;
    let exit = Worker::new(config, executor)
        .with_signal_watch(true)
        .run(&mut guard)?;
    Ok(exit)
}
