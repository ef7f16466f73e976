//! Coordination between the reader, task threads and termination signals.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::DispatchError;
use crate::worker::WORKER_TARGET;

/// Signals that stop admission and start the drain.
const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Errors raised while installing termination handling.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Registering the signal handlers failed.
    #[error("failed to register signal handlers: {0}")]
    Register(#[source] std::io::Error),
    /// The signal watcher thread could not be spawned.
    #[error("failed to spawn signal watcher: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why the coordinator woke up.
#[derive(Debug)]
pub(crate) enum Wake {
    /// The reader loop returned.
    ReaderFinished(Result<(), DispatchError>),
    /// A task reported an unrecoverable failure.
    Fatal(String),
    /// A termination signal arrived.
    Interrupted(i32),
}

#[derive(Debug, Default)]
struct ShutdownState {
    reader: Option<Result<(), DispatchError>>,
    fatal: Option<String>,
    signal: Option<i32>,
}

/// Shared stop flag and wake-up channel for the coordinator.
#[derive(Debug, Default)]
pub(crate) struct WorkerShutdown {
    state: Mutex<ShutdownState>,
    changed: Condvar,
}

impl WorkerShutdown {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reader_finished(&self, outcome: Result<(), DispatchError>) {
        self.update(|state| state.reader = Some(outcome));
    }

    /// Records the first fatal failure; later ones are logged only.
    pub(crate) fn request_fatal(&self, reason: String) {
        self.update(|state| {
            if state.fatal.is_none() {
                state.fatal = Some(reason);
            } else {
                warn!(target: WORKER_TARGET, %reason, "additional fatal failure while stopping");
            }
        });
    }

    pub(crate) fn interrupt(&self, signal: i32) {
        self.update(|state| {
            state.signal.get_or_insert(signal);
        });
    }

    /// Whether the reader should stop admitting requests.
    pub(crate) fn is_stopping(&self) -> bool {
        let state = self.lock();
        state.fatal.is_some() || state.signal.is_some()
    }

    pub(crate) fn fatal_reason(&self) -> Option<String> {
        self.lock().fatal.clone()
    }

    /// Blocks until something ends the serving phase.
    ///
    /// Fatal failures take precedence over signals, which take precedence
    /// over the reader finishing.
    pub(crate) fn wait(&self) -> Wake {
        let mut state = self.lock();
        loop {
            if let Some(reason) = state.fatal.clone() {
                return Wake::Fatal(reason);
            }
            if let Some(signal) = state.signal {
                return Wake::Interrupted(signal);
            }
            if let Some(outcome) = state.reader.take() {
                return Wake::ReaderFinished(outcome);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut ShutdownState)) {
        apply(&mut self.lock());
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, ShutdownState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards SIGTERM, SIGINT, SIGQUIT and SIGHUP to a [`WorkerShutdown`].
pub(crate) struct SignalWatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    pub(crate) fn install(shutdown: Arc<WorkerShutdown>) -> Result<Self, ShutdownError> {
        let mut signals = Signals::new(TERMINATION_SIGNALS).map_err(ShutdownError::Register)?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("bobbin-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    info!(target: WORKER_TARGET, signal, "termination signal received");
                    shutdown.interrupt(signal);
                }
            })
            .map_err(ShutdownError::Spawn)?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: WORKER_TARGET, "signal watcher thread panicked");
        }
    }
}
