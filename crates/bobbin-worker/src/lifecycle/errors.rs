use thiserror::Error;

/// Errors raised while admitting requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The build tool reused the id of a request that is still active.
    #[error("request {request_id} is already active")]
    DuplicateRequest {
        /// The reused request id.
        request_id: i32,
    },
    /// The worker began stopping while a request waited for admission.
    #[error("admission interrupted by shutdown")]
    Interrupted,
}
