//! [`RemoteStore`] — a [`LocalStore`] wrapper that fills local misses by
//! fetching artifacts from peers.
//!
//! Concurrent fetches for the same sector are coalesced: only one
//! transfer runs, the rest wait for its outcome and then re-check the
//! local store.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kiln_index::SectorIndex;
use kiln_types::{
    AcquireMode, FsStat, PathType, SectorFileType, SectorId, SectorRef, StorageId,
};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::local::{fetch_temp_path, LocalStore};
use crate::{AcquireResponse, Store};

/// Transport used to fetch artifacts from, and clean up at, peers.
///
/// URLs come from [`StorageInfo`](kiln_types::StorageInfo) endpoints as
/// rewritten by the index. The trait lives on the consumer side so the
/// HTTP implementation (and test mocks) plug in from outside.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    /// Stream the artifact at `url` into `dest` (a file or directory,
    /// depending on the artifact kind).
    async fn fetch_sector(&self, url: &str, dest: &Path) -> Result<(), StoreError>;

    /// Fetch a remote storage path's usage snapshot.
    async fn fetch_stat(&self, url: &str) -> Result<FsStat, StoreError>;

    /// Ask a peer to delete the artifact at `url`.
    async fn delete(&self, url: &str) -> Result<(), StoreError>;
}

/// Wraps a [`LocalStore`]; on local miss, fetches artifacts from a peer
/// selected via the index.
pub struct RemoteStore {
    local: Arc<LocalStore>,
    index: Arc<dyn SectorIndex>,
    transport: Arc<dyn FetchTransport>,
    /// Sectors with a fetch in flight; used to coalesce duplicates.
    fetching: Mutex<HashSet<SectorId>>,
    fetch_done: Notify,
}

/// Removes the sector from the in-flight set on every exit path.
struct FetchSlot<'a> {
    store: &'a RemoteStore,
    sector: SectorId,
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        self.store
            .fetching
            .lock()
            .expect("fetching set poisoned")
            .remove(&self.sector);
        self.store.fetch_done.notify_waiters();
    }
}

impl RemoteStore {
    /// Wrap a local store with remote-fetch capability.
    pub fn new(local: Arc<LocalStore>, transport: Arc<dyn FetchTransport>) -> Self {
        let index = local.sector_index().clone();
        Self {
            local,
            index,
            transport,
            fetching: Mutex::new(HashSet::new()),
            fetch_done: Notify::new(),
        }
    }

    /// The wrapped local store.
    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    /// The index shared with the local store.
    pub fn sector_index(&self) -> &Arc<dyn SectorIndex> {
        &self.index
    }

    /// Claim the fetch slot for a sector, waiting while another fetch of
    /// the same sector is in flight.
    async fn claim_fetch_slot(&self, sector: SectorId) -> FetchSlot<'_> {
        loop {
            let done = self.fetch_done.notified();
            {
                let mut fetching = self.fetching.lock().expect("fetching set poisoned");
                if !fetching.contains(&sector) {
                    fetching.insert(sector);
                    return FetchSlot {
                        store: self,
                        sector,
                    };
                }
            }
            debug!(%sector, "waiting for in-flight fetch of the same sector");
            done.await;
        }
    }

    /// Fetch one missing file type from the best remote source into a
    /// freshly reserved local allocation.
    async fn acquire_from_remote(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> Result<(std::path::PathBuf, StorageId), StoreError> {
        let mut sources = self
            .index
            .storage_find_sector(sector.id, file_type, None)
            .await?;
        // Prefer primaries, then the heaviest holders.
        sources.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then(b.weight.cmp(&a.weight))
        });

        if sources.is_empty() {
            return Err(StoreError::NotFoundSector {
                sector: sector.id,
                file_type,
            });
        }

        let allocation = self
            .local
            .acquire_sector(sector, SectorFileType::NONE, file_type, path_type, mode)
            .await?;
        let dest = allocation
            .paths
            .get(file_type)
            .ok_or(StoreError::NotFoundPath)?
            .clone();
        let dest_id = allocation
            .storages
            .get(file_type)
            .ok_or(StoreError::NotFoundPath)?
            .clone();

        // Hold the reservation for the duration of the transfer.
        let _reservation = self
            .local
            .reserve(sector, file_type, &allocation.storages, path_type)
            .await?;

        let temp = fetch_temp_path(&dest);
        let mut last_err = StoreError::NotFoundSector {
            sector: sector.id,
            file_type,
        };
        for source in &sources {
            // A local holder would have satisfied the local acquire.
            for url in &source.urls {
                match self.transport.fetch_sector(url, &temp).await {
                    Ok(()) => {
                        tokio::fs::rename(&temp, &dest).await?;
                        info!(%url, dest = %dest.display(), "fetched sector file");
                        return Ok((dest, dest_id));
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "fetch failed, trying next source");
                        last_err = e;
                    }
                }
            }
        }

        // Clean up a partial transfer, if any.
        if temp.exists() {
            if temp.is_dir() {
                let _ = tokio::fs::remove_dir_all(&temp).await;
            } else {
                let _ = tokio::fs::remove_file(&temp).await;
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn acquire_sector(
        &self,
        sector: SectorRef,
        existing: SectorFileType,
        allocate: SectorFileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> Result<AcquireResponse, StoreError> {
        if existing.intersects(allocate) {
            return Err(StoreError::FindAndAllocate);
        }

        let _slot = self.claim_fetch_slot(sector.id).await;

        let mut response = self
            .local
            .acquire_sector(sector, existing, allocate, path_type, mode)
            .await?;

        for t in existing.iter() {
            if response.paths.has(t) {
                continue;
            }

            let (path, storage_id) = self
                .acquire_from_remote(sector, t, path_type, mode)
                .await?;

            if let Err(e) = self
                .index
                .storage_declare_sector(&storage_id, sector.id, t, false)
                .await
            {
                warn!(sector = %sector.id, file_type = %t, error = %e,
                      "declaring fetched sector failed");
            }

            response.paths.set(t, path);
            response.storages.set(t, storage_id);
        }

        Ok(response)
    }

    async fn remove(&self, sector: SectorId, file_type: SectorFileType) -> Result<(), StoreError> {
        self.local.remove(sector, file_type).await?;

        // Best-effort cleanup of remote replicas.
        let infos = self
            .index
            .storage_find_sector(sector, file_type, None)
            .await?;
        for info in infos {
            for url in &info.urls {
                match self.transport.delete(url).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(%url, error = %e, "remote delete failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn move_storage(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
    ) -> Result<(), StoreError> {
        // Bring everything local first, then let the local store re-home it.
        self.acquire_sector(
            sector,
            file_type,
            SectorFileType::NONE,
            PathType::Storage,
            AcquireMode::Move,
        )
        .await?;
        self.local.move_storage(sector, file_type).await
    }

    async fn get_fs_stat(&self, id: &StorageId) -> Result<FsStat, StoreError> {
        match self.local.get_fs_stat(id).await {
            Ok(stat) => Ok(stat),
            Err(StoreError::NotFoundStorage(_)) => {
                let info = self.index.get_storage_info(id).await?;
                let url = info
                    .urls
                    .first()
                    .ok_or_else(|| StoreError::NotFoundStorage(id.clone()))?;
                let stat_url = format!("{}/stat/{}", url.trim_end_matches('/'), id);
                self.transport.fetch_stat(&stat_url).await
            }
            Err(e) => Err(e),
        }
    }
}
