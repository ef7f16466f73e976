//! Table of requests the worker has admitted but not yet answered.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bobbin_protocol::SINGLEPLEX_REQUEST_ID;
use tracing::debug;

use super::LIFECYCLE_TARGET;
use super::errors::LifecycleError;
use super::state::{CancelOutcome, RequestCell};

/// Interval between stop checks while waiting for the singleplex slot.
const VACANCY_POLL: Duration = Duration::from_millis(100);

/// Requests admitted by the reader, keyed by request id.
///
/// An entry stays in the table until its response has been written, so a
/// request id is never reused while a response for it is still pending.
#[derive(Debug, Default)]
pub struct ActiveRequests {
    entries: Mutex<HashMap<i32, Arc<RequestCell>>>,
    singleplex_vacated: Condvar,
}

impl ActiveRequests {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `request_id`, returning the cell that tracks it.
    ///
    /// Singleplex requests (id 0) wait until the previous singleplex request
    /// has been answered. `should_stop` is polled while waiting so shutdown is
    /// not held up by a long-running singleplex task.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DuplicateRequest`] when a multiplex id is
    /// already active and [`LifecycleError::Interrupted`] when `should_stop`
    /// reports true during the singleplex wait.
    pub fn admit(
        &self,
        request_id: i32,
        should_stop: impl Fn() -> bool,
    ) -> Result<Arc<RequestCell>, LifecycleError> {
        let mut entries = self.lock();
        if request_id == SINGLEPLEX_REQUEST_ID {
            while entries.contains_key(&request_id) {
                if should_stop() {
                    return Err(LifecycleError::Interrupted);
                }
                let (guard, _) = self
                    .singleplex_vacated
                    .wait_timeout(entries, VACANCY_POLL)
                    .unwrap_or_else(PoisonError::into_inner);
                entries = guard;
            }
        } else if entries.contains_key(&request_id) {
            return Err(LifecycleError::DuplicateRequest { request_id });
        }

        let cell = Arc::new(RequestCell::new(request_id));
        entries.insert(request_id, Arc::clone(&cell));
        Ok(cell)
    }

    /// Cancels `request_id` if it is still active.
    ///
    /// Returns `None` when the id is unknown, which covers requests that
    /// already finished and ids that were never admitted.
    pub fn cancel(&self, request_id: i32) -> Option<CancelOutcome> {
        let cell = self.lock().get(&request_id).cloned();
        let Some(cell) = cell else {
            debug!(
                target: LIFECYCLE_TARGET,
                request_id, "cancellation for unknown request ignored"
            );
            return None;
        };
        let outcome = cell.cancel();
        debug!(target: LIFECYCLE_TARGET, request_id, ?outcome, "cancellation processed");
        Some(outcome)
    }

    /// Removes `request_id` once its response has been written.
    pub fn remove(&self, request_id: i32) {
        let removed = self.lock().remove(&request_id).is_some();
        if removed && request_id == SINGLEPLEX_REQUEST_ID {
            self.singleplex_vacated.notify_all();
        }
    }

    /// Whether `request_id` is currently active.
    #[must_use]
    pub fn contains(&self, request_id: i32) -> bool {
        self.lock().contains_key(&request_id)
    }

    /// Number of active requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no requests are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The map is only mutated through single insert/remove calls, so a
    // poisoned lock still guards a consistent table.
    fn lock(&self) -> MutexGuard<'_, HashMap<i32, Arc<RequestCell>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
