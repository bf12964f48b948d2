//! Error types for the scheduler.

/// Errors returned by scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No registered worker satisfies the request's selector.
    #[error("no worker satisfies the request")]
    NotFoundWorker,

    /// A selector failed while deliberating over workers.
    #[error("cannot select worker: {0}")]
    CannotSelectWorker(String),

    /// A worker protocol call failed.
    #[error(transparent)]
    Call(#[from] kiln_types::CallError),

    /// The work-state store failed.
    #[error("work state store error: {0}")]
    Works(#[from] fjall::Error),

    /// Work-state (de)serialization failed.
    #[error("work state serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
