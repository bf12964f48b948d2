//! Sector placement index and lock manager.
//!
//! The [`SectorIndex`] is the single source of truth for which storage
//! location holds which sector-file artifact, for location health, and for
//! the per-sector read/write locks that serialize pipeline stages touching
//! the same files. [`StorageIndex`] is the in-process implementation.

mod error;
mod index;
mod locks;

use std::time::Duration;

use async_trait::async_trait;
use kiln_types::{
    FsStat, HealthReport, PathType, SectorFileType, SectorId, SectorSize, StorageId, StorageInfo,
};

pub use error::IndexError;
pub use index::StorageIndex;
pub use locks::WLock;

/// Interval at which stores push health reports.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// A location whose last heartbeat is older than this is treated as
/// unhealthy by allocation scoring (5× the heartbeat interval).
pub const STALE_HEARTBEAT: Duration = Duration::from_secs(50);

/// The placement registry and lock manager interface.
#[async_trait]
pub trait SectorIndex: Send + Sync {
    /// Register (or refresh) a storage location and its initial usage.
    ///
    /// Attach is an upsert: a second attach for the same id updates the
    /// descriptor fields and merges the URL list.
    async fn storage_attach(&self, info: StorageInfo, stat: FsStat) -> Result<(), IndexError>;

    /// Look up a location's descriptor.
    async fn get_storage_info(&self, id: &StorageId) -> Result<StorageInfo, IndexError>;

    /// Refresh a location's cached usage and error state.
    async fn storage_report_health(
        &self,
        id: &StorageId,
        report: HealthReport,
    ) -> Result<(), IndexError>;

    /// Record that a location holds the given sector file types.
    ///
    /// Multiple locations may hold the same type (replication); `primary`
    /// marks the preferred source.
    async fn storage_declare_sector(
        &self,
        id: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
        primary: bool,
    ) -> Result<(), IndexError>;

    /// Remove a placement record.
    async fn storage_drop_sector(
        &self,
        id: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<(), IndexError>;

    /// Find locations holding the given sector file types.
    ///
    /// Returned URLs point at the concrete artifact resource. When
    /// `fetch_size` is given, allocation-eligible destinations sized for
    /// that sector are appended (at weight 0) for callers willing to
    /// fetch.
    async fn storage_find_sector(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
        fetch_size: Option<SectorSize>,
    ) -> Result<Vec<StorageInfo>, IndexError>;

    /// Rank eligible locations for producing the given file types.
    ///
    /// Candidates lacking the capability for `path_type`, lacking space,
    /// stale, or in error are filtered out.
    async fn storage_best_alloc(
        &self,
        allocate: SectorFileType,
        sector_size: SectorSize,
        path_type: PathType,
    ) -> Result<Vec<StorageInfo>, IndexError>;

    /// Acquire a read/write lock over the sector's file types, waiting
    /// until the requested masks no longer conflict with held bits.
    ///
    /// Fails only on malformed requests (a type in both masks).
    async fn storage_lock(
        &self,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Result<WLock, IndexError>;

    /// Non-blocking lock attempt. Returns `None` if the masks conflict
    /// with held bits (or the request is malformed), without waiting.
    fn storage_try_lock(
        &self,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Option<WLock>;
}
