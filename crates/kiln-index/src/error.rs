//! Error types for the sector index.

use kiln_types::StorageId;

/// Errors returned by [`SectorIndex`](crate::SectorIndex) operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No storage registered under the given id.
    #[error("storage not found: {0}")]
    StorageNotFound(StorageId),

    /// No registered location can hold the requested allocation.
    #[error("no suitable storage candidate for allocation")]
    NoSuitableCandidate,

    /// A storage endpoint URL failed to parse.
    #[error("invalid storage url: {0}")]
    InvalidUrl(String),

    /// A lock request named a file type as both read and write.
    #[error("cannot lock storage: read and write masks overlap on {0}")]
    CannotLockStorage(kiln_types::SectorFileType),

    /// The index implementation does not serve this operation (returned
    /// by remote index proxies for local-only calls).
    #[error("method not supported by this index")]
    NotSupportedMethod,

    /// Space sizing failed for the requested file types.
    #[error(transparent)]
    Types(#[from] kiln_types::TypesError),
}
