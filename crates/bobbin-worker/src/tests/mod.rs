//! Test suites for the persistent worker.

pub(crate) mod support;
