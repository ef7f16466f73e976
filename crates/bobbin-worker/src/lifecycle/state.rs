//! Per-request state word and the transitions allowed on it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use super::LIFECYCLE_TARGET;

const TAG_BITS: u32 = 2;
const TAG_MASK: u64 = 0b11;
const TAG_NOT_STARTED: u64 = 0;
const TAG_CANCELLED: u64 = 1;
const TAG_FINISHED: u64 = 2;
const TAG_RUNNING: u64 = 3;

/// Identifies the pool thread executing a request.
///
/// Identifiers are allocated from 1 upwards and must stay below `2^62` so
/// they fit next to the state tag in a single atomic word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunnerId(u64);

impl RunnerId {
    /// Wraps a raw runner number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw runner number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runner-{}", self.0)
    }
}

/// Lifecycle of one admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Admitted but not yet picked up by a pool thread.
    NotStarted,
    /// The build tool withdrew the request.
    Cancelled,
    /// The request reached its terminal state.
    Finished,
    /// A pool thread is executing the request.
    Running(RunnerId),
}

impl RequestState {
    const fn encode(self) -> u64 {
        match self {
            Self::NotStarted => TAG_NOT_STARTED,
            Self::Cancelled => TAG_CANCELLED,
            Self::Finished => TAG_FINISHED,
            Self::Running(runner) => (runner.0 << TAG_BITS) | TAG_RUNNING,
        }
    }

    const fn decode(word: u64) -> Self {
        match word & TAG_MASK {
            TAG_NOT_STARTED => Self::NotStarted,
            TAG_CANCELLED => Self::Cancelled,
            TAG_FINISHED => Self::Finished,
            _ => Self::Running(RunnerId(word >> TAG_BITS)),
        }
    }
}

/// Result of handing a request to a pool thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The caller now owns the request and must run it.
    Started,
    /// The request was cancelled before it started; it is now finished and
    /// the caller must answer it with a cancelled response.
    CancelledBeforeStart,
    /// The request was already started or finished elsewhere.
    Rejected(RequestState),
}

/// Result of a cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request will be answered as cancelled without running.
    CancelledBeforeStart,
    /// The request is running; its result will be discarded.
    CancelledWhileRunning(RunnerId),
    /// The request had already been cancelled or finished.
    AlreadySettled(RequestState),
}

type CancelCallback = Box<dyn FnOnce() + Send>;

/// Shared cell holding the atomic state of one admitted request.
pub struct RequestCell {
    request_id: i32,
    state: AtomicU64,
    on_cancel: Mutex<Option<CancelCallback>>,
}

impl fmt::Debug for RequestCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCell")
            .field("request_id", &self.request_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RequestCell {
    /// Creates a cell in the [`RequestState::NotStarted`] state.
    #[must_use]
    pub const fn new(request_id: i32) -> Self {
        Self {
            request_id,
            state: AtomicU64::new(TAG_NOT_STARTED),
            on_cancel: Mutex::new(None),
        }
    }

    /// Request id this cell tracks.
    #[must_use]
    pub const fn request_id(&self) -> i32 {
        self.request_id
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> RequestState {
        RequestState::decode(self.state.load(Ordering::Acquire))
    }

    /// Whether the build tool has withdrawn the request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == RequestState::Cancelled
    }

    /// Claims the request for `runner`.
    pub fn start(&self, runner: RunnerId) -> StartOutcome {
        let claimed = self.state.compare_exchange(
            TAG_NOT_STARTED,
            RequestState::Running(runner).encode(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let current = match claimed {
            Ok(_) => return StartOutcome::Started,
            Err(current) => current,
        };
        if current != TAG_CANCELLED {
            return StartOutcome::Rejected(RequestState::decode(current));
        }
        match self.state.compare_exchange(
            TAG_CANCELLED,
            TAG_FINISHED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => StartOutcome::CancelledBeforeStart,
            Err(other) => StartOutcome::Rejected(RequestState::decode(other)),
        }
    }

    /// Marks the request cancelled unless it already settled.
    ///
    /// Never blocks on the executing thread. When the request was running,
    /// the advisory callback registered through [`RequestCell::on_cancel`]
    /// is invoked; a panicking callback is logged and otherwise ignored.
    pub fn cancel(&self) -> CancelOutcome {
        let mut observed = self.state.load(Ordering::Acquire);
        loop {
            let snapshot = RequestState::decode(observed);
            if matches!(snapshot, RequestState::Cancelled | RequestState::Finished) {
                return CancelOutcome::AlreadySettled(snapshot);
            }
            match self.state.compare_exchange_weak(
                observed,
                TAG_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return match snapshot {
                        RequestState::Running(runner) => {
                            self.run_cancel_callback();
                            CancelOutcome::CancelledWhileRunning(runner)
                        }
                        _ => CancelOutcome::CancelledBeforeStart,
                    };
                }
                Err(current) => observed = current,
            }
        }
    }

    /// Moves the request to [`RequestState::Finished`], returning the state
    /// it replaced.
    pub fn finish(&self) -> RequestState {
        RequestState::decode(self.state.swap(TAG_FINISHED, Ordering::AcqRel))
    }

    /// Registers an advisory callback run once if the request is cancelled
    /// while it executes.
    ///
    /// When the request is already cancelled the callback runs immediately
    /// on the calling thread.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        *self.callback_slot() = Some(Box::new(callback));
        if self.is_cancelled() {
            self.run_cancel_callback();
        }
    }

    fn callback_slot(&self) -> std::sync::MutexGuard<'_, Option<CancelCallback>> {
        self.on_cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_cancel_callback(&self) {
        let Some(callback) = self.callback_slot().take() else {
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            warn!(
                target: LIFECYCLE_TARGET,
                request_id = self.request_id,
                "cancellation callback panicked; ignoring"
            );
        }
    }
}
