//! Thread-per-task pool with cooperative shutdown.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::lifecycle::RunnerId;

const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Errors raised when scheduling a task.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts tasks.
    #[error("task pool is shut down")]
    Closed,
    /// The operating system refused to create a thread.
    #[error("failed to spawn task thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug)]
struct PoolState {
    active: usize,
    accepting: bool,
}

/// Elastic pool running each task on its own named thread.
///
/// Tasks are never interrupted; [`TaskPool::shutdown_now`] only stops
/// waiting for them.
#[derive(Debug)]
pub struct TaskPool {
    state: Mutex<PoolState>,
    idle: Condvar,
    next_runner: AtomicU64,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    /// Creates an empty pool that accepts tasks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                active: 0,
                accepting: true,
            }),
            idle: Condvar::new(),
            next_runner: AtomicU64::new(1),
        }
    }

    /// Runs `task` on a new thread named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] after shutdown and
    /// [`PoolError::Spawn`] when the thread cannot be created. `task` is
    /// dropped without running in both cases.
    pub fn spawn<F>(self: &Arc<Self>, name: String, task: F) -> Result<RunnerId, PoolError>
    where
        F: FnOnce(RunnerId) + Send + 'static,
    {
        {
            let mut state = self.lock();
            if !state.accepting {
                return Err(PoolError::Closed);
            }
            state.active += 1;
        }

        let runner = RunnerId::new(self.next_runner.fetch_add(1, Ordering::Relaxed));
        let pool = Arc::clone(self);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let _slot = ActiveSlot { pool: &pool };
            task(runner);
        });
        match spawned {
            Ok(_) => Ok(runner),
            Err(error) => {
                self.release_slot();
                Err(PoolError::Spawn(error))
            }
        }
    }

    /// Stops accepting new tasks. Running tasks continue.
    pub fn shutdown(&self) {
        self.lock().accepting = false;
    }

    /// Waits up to `timeout` for running tasks to finish.
    ///
    /// Returns `true` when no task is running.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.active > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .idle
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stops accepting tasks and abandons those still running.
    ///
    /// Returns the number of abandoned tasks. Their threads keep running
    /// until the process exits.
    pub fn shutdown_now(&self) -> usize {
        let mut state = self.lock();
        state.accepting = false;
        if state.active > 0 {
            warn!(target: POOL_TARGET, abandoned = state.active, "abandoning running tasks");
        }
        state.active
    }

    /// Number of tasks currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Whether the pool is shut down with no task running.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        let state = self.lock();
        !state.accepting && state.active == 0
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            self.idle.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the task's slot when the thread exits, including by panic.
struct ActiveSlot<'a> {
    pool: &'a TaskPool,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.pool.release_slot();
    }
}
