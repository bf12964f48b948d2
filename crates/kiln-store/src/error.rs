//! Error types for store operations.

use kiln_types::{SectorFileType, SectorId, StorageId};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A file type was requested as both existing and to-allocate.
    #[error("file type requested as both existing and allocate")]
    FindAndAllocate,

    /// No eligible destination path for an allocation.
    #[error("no path eligible for the requested allocation")]
    NotFoundPath,

    /// No storage open under the given id.
    #[error("storage not found: {0}")]
    NotFoundStorage(StorageId),

    /// No reachable copy of an existing sector file.
    #[error("sector file not found: {sector} ({file_type})")]
    NotFoundSector {
        /// The sector whose file was requested.
        sector: SectorId,
        /// The missing file type.
        file_type: SectorFileType,
    },

    /// The path is already open under this store.
    #[error("storage already open: {0}")]
    DuplicateStorage(StorageId),

    /// Remove operates on exactly one file type.
    #[error("remove called with several file types: {0}")]
    RemoveSeveralFileTypes(SectorFileType),

    /// The sector's file type is already reserved on the target path.
    #[error("already reserved: {sector} ({file_type})")]
    AlreadyReserved {
        /// The sector being reserved for.
        sector: SectorId,
        /// The already-reserved file type.
        file_type: SectorFileType,
    },

    /// Not enough free space to back a reservation.
    #[error("cannot reserve {need} bytes, only {available} available")]
    CannotReserve {
        /// Bytes the reservation needs.
        need: u64,
        /// Bytes currently available.
        available: u64,
    },

    /// Renaming an artifact to its new home failed.
    #[error("cannot move sector file: {0}")]
    CannotMoveSector(std::io::Error),

    /// A transport failure while fetching from or deleting at a peer.
    #[error("fetch transport error: {0}")]
    Fetch(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An index operation failed.
    #[error("index error: {0}")]
    Index(#[from] kiln_index::IndexError),

    /// A core type failed to parse or validate.
    #[error(transparent)]
    Types(#[from] kiln_types::TypesError),
}
