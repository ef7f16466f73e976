//! Request lifecycle tracking.
//!
//! Every admitted request owns a [`RequestCell`] whose state moves through
//! `NotStarted -> Running -> Finished`, with `Cancelled` reachable from
//! either of the first two. Transitions are single atomic operations so the
//! reader thread can cancel a request without waiting on the thread that
//! executes it.

mod errors;
mod state;
mod table;

pub use errors::LifecycleError;
pub use state::{CancelOutcome, RequestCell, RequestState, RunnerId, StartOutcome};
pub use table::ActiveRequests;

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
