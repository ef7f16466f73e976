//! Persistent build worker for the Bobbin protocol.
//!
//! A persistent worker is started once by the build tool and then serves
//! many requests over its stdin and stdout, one newline-delimited JSON frame
//! per message. The worker:
//!
//! - multiplexes concurrent requests by id, running each on its own thread;
//! - lets the build tool cancel requests cooperatively;
//! - isolates the process standard streams so task code printing to stdout
//!   or stderr cannot corrupt the protocol.
//!
//! Task logic is supplied as a [`TaskExecutor`]. The bundled binary runs the
//! [`EchoExecutor`]; embedders call [`run`] with their own executor.
//!
//! ```no_run
//! use bobbin_worker::{EchoExecutor, SystemConfigLoader};
//!
//! fn main() -> std::process::ExitCode {
//!     bobbin_worker::run(std::env::args_os().collect(), &SystemConfigLoader, EchoExecutor)
//! }
//! ```

mod bootstrap;
mod dispatch;
mod execution;
mod executor;
mod launch;
pub mod lifecycle;
mod pool;
mod shutdown;
pub mod stdio;
mod telemetry;
mod worker;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::DispatchError;
pub use executor::{EchoExecutor, TaskContext, TaskError, TaskExecutor};
pub use launch::{LaunchError, PERSISTENT_WORKER_FLAG, is_persistent_worker, launch, run};
pub use pool::{PoolError, TaskPool};
pub use shutdown::ShutdownError;
pub use stdio::{CapturedOutput, IsolationError, ProtocolStreams, StdioGuard, StdioIsolation};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use worker::{Worker, WorkerError, WorkerExit};

#[cfg(test)]
mod tests;
