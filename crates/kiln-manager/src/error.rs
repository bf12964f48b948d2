//! Error types for the pipeline façade.

use kiln_types::SectorId;

/// Errors returned by [`SectorManager`](crate::SectorManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// A worker returned a result of the wrong variant for the stage.
    #[error("unexpected call result: expected {expected}, got {actual}")]
    VariantMismatch {
        /// The variant the stage decodes.
        expected: &'static str,
        /// The variant the worker returned.
        actual: &'static str,
    },

    /// The worker explicitly failed the call.
    #[error(transparent)]
    Call(#[from] kiln_types::CallError),

    /// Winning-PoSt eligibility violated: these sectors could not be
    /// proven, and winning post must cover the exact eligible set.
    #[error("sectors skipped during winning post: {0:?}")]
    SomeSectorsSkipped(Vec<SectorId>),

    /// The proof engine failed.
    #[error("proof engine error: {0}")]
    Proof(String),

    /// An index operation failed.
    #[error(transparent)]
    Index(#[from] kiln_index::IndexError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] kiln_store::StoreError),

    /// A scheduler operation failed.
    #[error(transparent)]
    Scheduler(#[from] kiln_sched::SchedulerError),

    /// A core type failed to parse or validate.
    #[error(transparent)]
    Types(#[from] kiln_types::TypesError),
}
