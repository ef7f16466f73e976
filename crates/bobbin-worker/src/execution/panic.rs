//! Panic capture for task threads.
//!
//! Task panics are caught with `catch_unwind`, but the payload alone carries
//! neither the location nor a backtrace. While a worker runs, a process-wide
//! hook records both for panics raised on task threads and leaves every
//! other thread to the previously installed hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

type Hook = dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static;

thread_local! {
    static IN_TASK: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicRecord>> = const { RefCell::new(None) };
}

struct PanicRecord {
    location: Option<String>,
    trace: String,
}

/// Installs the recording hook and restores the previous one on drop.
pub(crate) struct PanicHookGuard {
    previous: Arc<Hook>,
}

impl PanicHookGuard {
    pub(crate) fn install() -> Self {
        let previous: Arc<Hook> = Arc::from(panic::take_hook());
        let fallback = Arc::clone(&previous);
        panic::set_hook(Box::new(move |info| {
            if IN_TASK.get() {
                record(info);
            } else {
                fallback(info);
            }
        }));
        Self { previous }
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        let previous = Arc::clone(&self.previous);
        panic::set_hook(Box::new(move |info| previous(info)));
    }
}

fn record(info: &PanicHookInfo<'_>) {
    let record = PanicRecord {
        location: info.location().map(ToString::to_string),
        trace: Backtrace::force_capture().to_string(),
    };
    LAST_PANIC.with_borrow_mut(|slot| *slot = Some(record));
}

/// Marks the current thread as running task code until dropped.
pub(crate) struct TaskScope {
    _private: (),
}

impl TaskScope {
    pub(crate) fn enter() -> Self {
        IN_TASK.set(true);
        LAST_PANIC.with_borrow_mut(|slot| *slot = None);
        Self { _private: () }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        IN_TASK.set(false);
    }
}

/// Renders a caught panic payload with whatever the hook recorded.
///
/// Falls back to a backtrace of the catch site when the hook did not run,
/// for example because another hook replaced it.
pub(crate) fn render_panic(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    let record = LAST_PANIC.with_borrow_mut(Option::take);
    let (location, trace) = match record {
        Some(PanicRecord { location, trace }) => (location, trace),
        None => (None, Backtrace::force_capture().to_string()),
    };
    let location = location.map_or_else(String::new, |location| format!(" at {location}"));
    format!("panic: {message}{location}\nstack backtrace:\n{trace}")
}
