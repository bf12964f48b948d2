//! Sector-file stores.
//!
//! [`LocalStore`] manages the node's own storage paths: it opens paths
//! described by a persisted `sectorstore.json`, acquires/creates/reserves/
//! moves/removes sector files, registers everything with the
//! [`SectorIndex`](kiln_index::SectorIndex), and pushes periodic health
//! reports. [`RemoteStore`] wraps a `LocalStore` and fills local misses by
//! streaming artifacts from peers, coalescing duplicate in-flight fetches.

mod error;
mod local;
mod local_storage;
mod remote;

use std::path::PathBuf;

use async_trait::async_trait;
use kiln_types::{
    AcquireMode, FileTypeMap, FsStat, PathType, SectorFileType, SectorId, SectorRef, StorageId,
};

pub use error::StoreError;
pub use local::{LocalStore, ReservationGuard};
pub use local_storage::{FsLocalStorage, LocalStorage, StorageConfig};
pub use remote::{FetchTransport, RemoteStore};

/// Result of acquiring sector files: for every satisfied file type, the
/// local filesystem path and the storage id backing it.
#[derive(Debug, Clone, Default)]
pub struct AcquireResponse {
    /// Materialized filesystem path per file type.
    pub paths: FileTypeMap<PathBuf>,
    /// Backing storage location per file type.
    pub storages: FileTypeMap<StorageId>,
}

/// Common surface of the local and remote stores.
#[async_trait]
pub trait Store: Send + Sync {
    /// Locate existing sector files and allocate destinations for new
    /// ones.
    ///
    /// A file type may not appear in both masks ([`StoreError::FindAndAllocate`]).
    /// Allocation failures are [`StoreError::NotFoundPath`]; existing
    /// types that cannot be located locally are simply absent from the
    /// response (the remote store fills them by fetching).
    async fn acquire_sector(
        &self,
        sector: SectorRef,
        existing: SectorFileType,
        allocate: SectorFileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> Result<AcquireResponse, StoreError>;

    /// Delete a single sector file type everywhere this store can reach,
    /// dropping the placement records.
    async fn remove(&self, sector: SectorId, file_type: SectorFileType) -> Result<(), StoreError>;

    /// Migrate the given artifacts to the best long-term destination.
    async fn move_storage(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
    ) -> Result<(), StoreError>;

    /// Usage snapshot for one storage location, including reservations.
    async fn get_fs_stat(&self, id: &StorageId) -> Result<FsStat, StoreError>;
}
