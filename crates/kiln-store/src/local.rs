//! [`LocalStore`] — management of this node's own storage paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use kiln_index::{SectorIndex, HEARTBEAT_INTERVAL};
use kiln_types::{
    AcquireMode, FileTypeMap, FsStat, HealthReport, PathType, SectorFileType, SectorId, SectorRef,
    StorageId, StorageInfo, StoragePath, METADATA_FILE,
};
use rand::Rng;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::local_storage::LocalStorage;
use crate::{AcquireResponse, Store};

/// Temp destination a fetch streams into before renaming into place.
pub(crate) fn fetch_temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".fetching");
    PathBuf::from(os)
}

#[derive(Default)]
struct Reservations {
    /// Total bytes reserved on this path.
    total: u64,
    /// Which file types each sector has reserved here.
    by_sector: HashMap<SectorId, SectorFileType>,
}

/// One open storage path.
struct StorePath {
    local_path: PathBuf,
    reservations: Mutex<Reservations>,
}

/// An acquired space reservation. Dropping it returns the reserved bytes
/// to the pool, on every exit path.
pub struct ReservationGuard {
    items: Vec<ReservedItem>,
}

struct ReservedItem {
    entry: Arc<StorePath>,
    overhead: u64,
    sector: SectorId,
    file_type: SectorFileType,
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        for item in self.items.drain(..) {
            let mut res = item.entry.reservations.lock().expect("reservations poisoned");
            res.total = res.total.saturating_sub(item.overhead);
            if let Some(mask) = res.by_sector.get_mut(&item.sector) {
                *mask = mask.without(item.file_type);
                if mask.is_empty() {
                    res.by_sector.remove(&item.sector);
                }
            }
        }
    }
}

/// Manages the node's own storage paths: opens them from the persisted
/// config, places and removes sector files, accounts reservations, and
/// reports health to the index on a timer.
pub struct LocalStore {
    storage: Arc<dyn LocalStorage>,
    index: Arc<dyn SectorIndex>,
    urls: Vec<String>,
    paths: RwLock<HashMap<StorageId, Arc<StorePath>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl LocalStore {
    /// Open a local store: re-open every path listed in the persisted
    /// config and start the health reporter.
    ///
    /// `urls` are the fetch-endpoint base URLs this node is reachable at;
    /// they are attached to every opened path's [`StorageInfo`].
    pub async fn open(
        storage: Arc<dyn LocalStorage>,
        index: Arc<dyn SectorIndex>,
        urls: Vec<String>,
    ) -> Result<Arc<Self>, StoreError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let store = Arc::new(Self {
            storage,
            index,
            urls,
            paths: RwLock::new(HashMap::new()),
            shutdown_tx,
        });

        if let Some(config) = store.storage.get_storage_config()? {
            for path in &config.storage_paths {
                store.open_path(path).await?;
            }
        }

        // Jitter the heartbeat so a fleet of stores doesn't report in
        // lockstep.
        let jitter = rand::thread_rng().gen_range(0..1000);
        let interval = HEARTBEAT_INTERVAL + Duration::from_millis(jitter);
        tokio::spawn(Self::run_health_reporter(
            Arc::downgrade(&store),
            interval,
            shutdown_rx,
        ));

        Ok(store)
    }

    /// Stop the health reporter.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// The index this store declares placements in.
    pub fn sector_index(&self) -> &Arc<dyn SectorIndex> {
        &self.index
    }

    /// The filesystem introspector backing this store.
    pub fn local_storage(&self) -> &Arc<dyn LocalStorage> {
        &self.storage
    }

    /// Open one storage path: read its persisted descriptor, attach it to
    /// the index, create per-type directories, and re-declare any sector
    /// files already present.
    pub async fn open_path(&self, path: &Path) -> Result<(), StoreError> {
        let mut paths = self.paths.write().await;

        let text = tokio::fs::read_to_string(path.join(METADATA_FILE)).await?;
        let meta: kiln_types::LocalStorageMeta =
            serde_json::from_str(&text).map_err(|e| StoreError::Io(std::io::Error::other(e)))?;

        if paths.contains_key(&meta.id) {
            return Err(StoreError::DuplicateStorage(meta.id));
        }

        let stat = self.storage.get_stat(path)?;
        self.index
            .storage_attach(
                StorageInfo {
                    id: meta.id.clone(),
                    urls: self.urls.clone(),
                    weight: meta.weight,
                    can_seal: meta.can_seal,
                    can_store: meta.can_store,
                    is_primary: false,
                },
                stat,
            )
            .await?;

        for t in SectorFileType::ALL {
            let dir = path.join(t.as_str());
            if !dir.exists() {
                tokio::fs::create_dir_all(&dir).await?;
                continue;
            }

            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let sector: SectorId = match name.parse() {
                    Ok(s) => s,
                    Err(_) => {
                        warn!(file = name, dir = %dir.display(), "skipping non-sector entry");
                        continue;
                    }
                };
                self.index
                    .storage_declare_sector(&meta.id, sector, t, meta.can_store)
                    .await?;
            }
        }

        self.storage.update_storage_config(&|config| {
            if !config.has(path) {
                config.storage_paths.push(path.to_path_buf());
            }
        })?;

        info!(id = %meta.id, path = %path.display(), weight = meta.weight,
              can_seal = meta.can_seal, can_store = meta.can_store, "storage path opened");

        paths.insert(
            meta.id,
            Arc::new(StorePath {
                local_path: path.to_path_buf(),
                reservations: Mutex::new(Reservations::default()),
            }),
        );
        Ok(())
    }

    /// Pre-account disk usage before a write lands, so two concurrent
    /// acquires cannot over-commit the same free space. The returned
    /// guard must live until the write completes (or fails).
    pub async fn reserve(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
        storages: &FileTypeMap<StorageId>,
        path_type: PathType,
    ) -> Result<ReservationGuard, StoreError> {
        let sector_size = sector.proof_type.sector_size();
        let paths = self.paths.read().await;

        let mut guard = ReservationGuard { items: Vec::new() };
        for t in file_type.iter() {
            let id = storages.get(t).ok_or(StoreError::NotFoundPath)?;
            let entry = paths.get(id).ok_or(StoreError::NotFoundPath)?.clone();
            let overhead = kiln_types::space_use(t, sector_size, path_type)?;

            let mut res = entry.reservations.lock().expect("reservations poisoned");
            if res
                .by_sector
                .get(&sector.id)
                .is_some_and(|m| m.intersects(t))
            {
                return Err(StoreError::AlreadyReserved {
                    sector: sector.id,
                    file_type: t,
                });
            }

            let stat = Self::stat_locked(&*self.storage, &entry, &res)?;
            if stat.available < overhead {
                return Err(StoreError::CannotReserve {
                    need: overhead,
                    available: stat.available,
                });
            }

            res.total += overhead;
            let mask = res.by_sector.entry(sector.id).or_insert(SectorFileType::NONE);
            *mask = mask.union(t);
            drop(res);

            debug!(sector = %sector.id, file_type = %t, storage = %id, overhead, "space reserved");
            guard.items.push(ReservedItem {
                entry,
                overhead,
                sector: sector.id,
                file_type: t,
            });
        }

        Ok(guard)
    }

    /// Delete every non-primary local copy of a sector file type,
    /// keeping the primary (and never touching anything when no primary
    /// exists, so the last copy survives).
    pub async fn remove_copies(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<(), StoreError> {
        if !file_type.is_single() {
            return Err(StoreError::RemoveSeveralFileTypes(file_type));
        }

        let infos = self
            .index
            .storage_find_sector(sector, file_type, None)
            .await?;

        if !infos.iter().any(|i| i.is_primary) {
            warn!(%sector, %file_type, "no primary copy, not removing anything");
            return Ok(());
        }

        for info in infos.iter().filter(|i| !i.is_primary) {
            self.remove_sector(sector, file_type, &info.id).await?;
        }
        Ok(())
    }

    /// Every locally accessible storage path, with its capabilities.
    pub async fn accessible_paths(&self) -> Result<Vec<StoragePath>, StoreError> {
        let paths = self.paths.read().await;
        let mut result = Vec::with_capacity(paths.len());
        for (id, entry) in paths.iter() {
            let info = self.index.get_storage_info(id).await?;
            result.push(StoragePath {
                id: id.clone(),
                weight: info.weight,
                local_path: entry.local_path.clone(),
                can_seal: info.can_seal,
                can_store: info.can_store,
            });
        }
        Ok(result)
    }

    async fn remove_sector(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
        storage: &StorageId,
    ) -> Result<(), StoreError> {
        let entry = {
            let paths = self.paths.read().await;
            paths.get(storage).cloned()
        };
        let Some(entry) = entry else {
            // Not one of our paths; nothing to delete locally.
            return Ok(());
        };

        self.index
            .storage_drop_sector(storage, sector, file_type)
            .await?;

        let artifact = entry
            .local_path
            .join(file_type.as_str())
            .join(sector.to_string());
        info!(path = %artifact.display(), "removing sector file");

        let result = if artifact.is_dir() {
            tokio::fs::remove_dir_all(&artifact).await
        } else {
            tokio::fs::remove_file(&artifact).await
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %artifact.display(), error = %e, "failed to delete sector file"),
        }
        Ok(())
    }

    /// Stat one path entry, folding in outstanding reservations.
    fn path_stat(&self, entry: &StorePath) -> Result<FsStat, StoreError> {
        let res = entry.reservations.lock().expect("reservations poisoned");
        Self::stat_locked(&*self.storage, entry, &res)
    }

    fn stat_locked(
        storage: &dyn LocalStorage,
        entry: &StorePath,
        res: &Reservations,
    ) -> Result<FsStat, StoreError> {
        let mut stat = storage.get_stat(&entry.local_path)?;

        // Bytes already on disk for a reserved file consume its
        // reservation, so the snapshot doesn't double-count.
        let mut reserved = res.total;
        for (sector, types) in &res.by_sector {
            for t in types.iter() {
                let artifact = entry.local_path.join(t.as_str()).join(sector.to_string());
                let used = match storage.get_disk_usage(&artifact)? {
                    Some(used) => used,
                    None => storage
                        .get_disk_usage(&fetch_temp_path(&artifact))?
                        .unwrap_or(0),
                };
                reserved = reserved.saturating_sub(used);
            }
        }

        stat.reserved = reserved;
        stat.available = stat.available.saturating_sub(reserved);
        Ok(stat)
    }

    async fn run_health_reporter(
        store: Weak<LocalStore>,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let Some(store) = store.upgrade() else { break };
                    store.report_health().await;
                }
                _ = shutdown_rx.changed() => {
                    debug!("health reporter stopped");
                    break;
                }
            }
        }
    }

    /// Push a health report for every open path.
    pub async fn report_health(&self) {
        let entries: Vec<(StorageId, Arc<StorePath>)> = {
            let paths = self.paths.read().await;
            paths.iter().map(|(id, e)| (id.clone(), e.clone())).collect()
        };

        for (id, entry) in entries {
            let report = match self.path_stat(&entry) {
                Ok(stat) => HealthReport { stat, error: None },
                Err(e) => HealthReport {
                    stat: FsStat::default(),
                    error: Some(e.to_string()),
                },
            };
            if let Err(e) = self.index.storage_report_health(&id, report).await {
                warn!(storage = %id, error = %e, "failed to report storage health");
            }
        }
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn acquire_sector(
        &self,
        sector: SectorRef,
        existing: SectorFileType,
        allocate: SectorFileType,
        path_type: PathType,
        _mode: AcquireMode,
    ) -> Result<AcquireResponse, StoreError> {
        if existing.intersects(allocate) {
            return Err(StoreError::FindAndAllocate);
        }

        let sector_size = sector.proof_type.sector_size();
        let paths = self.paths.read().await;
        let mut response = AcquireResponse::default();

        for t in existing.iter() {
            let infos = match self
                .index
                .storage_find_sector(sector.id, t, None)
                .await
            {
                Ok(infos) => infos,
                Err(e) => {
                    warn!(sector = %sector.id, file_type = %t, error = %e,
                          "finding existing sector failed");
                    continue;
                }
            };

            for info in infos {
                let Some(entry) = paths.get(&info.id) else {
                    continue;
                };
                let artifact = entry.local_path.join(t.as_str()).join(sector.id.to_string());
                response.paths.set(t, artifact);
                response.storages.set(t, info.id);
                break;
            }
        }

        for t in allocate.iter() {
            let candidates = self
                .index
                .storage_best_alloc(t, sector_size, path_type)
                .await?;

            let mut chosen = None;
            for info in candidates {
                if let Some(entry) = paths.get(&info.id) {
                    let artifact =
                        entry.local_path.join(t.as_str()).join(sector.id.to_string());
                    chosen = Some((artifact, info.id));
                    break;
                }
            }

            let Some((artifact, id)) = chosen else {
                return Err(StoreError::NotFoundPath);
            };
            response.paths.set(t, artifact);
            response.storages.set(t, id);
        }

        Ok(response)
    }

    async fn remove(&self, sector: SectorId, file_type: SectorFileType) -> Result<(), StoreError> {
        if !file_type.is_single() {
            return Err(StoreError::RemoveSeveralFileTypes(file_type));
        }

        let infos = self
            .index
            .storage_find_sector(sector, file_type, None)
            .await?;
        for info in infos {
            self.remove_sector(sector, file_type, &info.id).await?;
        }
        Ok(())
    }

    async fn move_storage(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
    ) -> Result<(), StoreError> {
        let dest = self
            .acquire_sector(
                sector,
                SectorFileType::NONE,
                file_type,
                PathType::Storage,
                AcquireMode::Move,
            )
            .await?;
        let src = self
            .acquire_sector(
                sector,
                file_type,
                SectorFileType::NONE,
                PathType::Storage,
                AcquireMode::Move,
            )
            .await?;

        for t in file_type.iter() {
            let src_id = src.storages.get(t).ok_or(StoreError::NotFoundSector {
                sector: sector.id,
                file_type: t,
            })?;
            let src_info = self.index.get_storage_info(src_id).await?;
            let dest_id = dest.storages.get(t).ok_or(StoreError::NotFoundPath)?;

            if src_id == dest_id {
                continue;
            }
            // Already on a long-term path; nothing to migrate.
            if src_info.can_store {
                continue;
            }

            self.index
                .storage_drop_sector(src_id, sector.id, t)
                .await?;

            let src_path = src.paths.get(t).ok_or(StoreError::NotFoundSector {
                sector: sector.id,
                file_type: t,
            })?;
            let dest_path = dest.paths.get(t).ok_or(StoreError::NotFoundPath)?;
            info!(from = %src_path.display(), to = %dest_path.display(), "moving sector file");
            tokio::fs::rename(src_path, dest_path)
                .await
                .map_err(StoreError::CannotMoveSector)?;

            self.index
                .storage_declare_sector(dest_id, sector.id, t, true)
                .await?;
        }

        Ok(())
    }

    async fn get_fs_stat(&self, id: &StorageId) -> Result<FsStat, StoreError> {
        let entry = {
            let paths = self.paths.read().await;
            paths.get(id).cloned()
        };
        match entry {
            Some(entry) => self.path_stat(&entry),
            None => Err(StoreError::NotFoundStorage(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_storage::FsLocalStorage;
    use kiln_index::StorageIndex;
    use kiln_types::{LocalStorageMeta, RegisteredSealProof};
    use tempfile::TempDir;

    const PROOF: RegisteredSealProof = RegisteredSealProof::StackedDrg2KiBV1_1;

    fn sector_ref(number: u64) -> SectorRef {
        SectorRef {
            id: SectorId::new(1000, number),
            proof_type: PROOF,
        }
    }

    /// Create a storage path directory with a descriptor in it.
    fn seed_path(dir: &Path, id: &str, weight: u64, can_seal: bool, can_store: bool) {
        std::fs::create_dir_all(dir).unwrap();
        let meta = LocalStorageMeta {
            id: StorageId::from(id),
            weight,
            can_seal,
            can_store,
        };
        std::fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();
    }

    async fn open_store(root: &TempDir) -> (Arc<LocalStore>, Arc<StorageIndex>) {
        let index = Arc::new(StorageIndex::new());
        let storage = Arc::new(FsLocalStorage::new(root.path().join("storage.json")));
        let store = LocalStore::open(
            storage,
            index.clone() as Arc<dyn SectorIndex>,
            vec!["http://localhost:3456/remote".to_string()],
        )
        .await
        .unwrap();
        (store, index)
    }

    #[tokio::test]
    async fn test_open_path_roundtrips_descriptor() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 7, true, false);

        let (store, index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        let info = index.get_storage_info(&StorageId::from("path-a")).await.unwrap();
        assert_eq!(info.weight, 7);
        assert!(info.can_seal);
        assert!(!info.can_store);
        assert_eq!(info.urls, vec!["http://localhost:3456/remote".to_string()]);

        // Per-type directories were created.
        for t in SectorFileType::ALL {
            assert!(path.join(t.as_str()).is_dir());
        }
        store.shutdown();
    }

    #[tokio::test]
    async fn test_open_path_twice_is_duplicate() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);

        let (store, _index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();
        assert!(matches!(
            store.open_path(&path).await,
            Err(StoreError::DuplicateStorage(_))
        ));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_open_path_missing_descriptor_fails() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("bare");
        std::fs::create_dir_all(&path).unwrap();

        let (store, _index) = open_store(&root).await;
        assert!(matches!(
            store.open_path(&path).await,
            Err(StoreError::Io(_))
        ));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_open_path_redeclares_existing_sectors() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);
        let sealed_dir = path.join("sealed");
        std::fs::create_dir_all(&sealed_dir).unwrap();
        std::fs::write(sealed_dir.join("s-t01000-5"), b"replica").unwrap();

        let (store, index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        let found = index
            .storage_find_sector(SectorId::new(1000, 5), SectorFileType::SEALED, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, StorageId::from("path-a"));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_acquire_rejects_overlapping_masks() {
        let root = TempDir::new().unwrap();
        let (store, _index) = open_store(&root).await;
        let err = store
            .acquire_sector(
                sector_ref(1),
                SectorFileType::SEALED,
                SectorFileType::SEALED,
                PathType::Sealing,
                AcquireMode::Move,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::FindAndAllocate));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_acquire_allocates_on_best_path() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);

        let (store, _index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        let resp = store
            .acquire_sector(
                sector_ref(1),
                SectorFileType::NONE,
                SectorFileType::SEALED | SectorFileType::CACHE,
                PathType::Sealing,
                AcquireMode::Move,
            )
            .await
            .unwrap();

        let sealed = resp.paths.get(SectorFileType::SEALED).unwrap();
        assert_eq!(*sealed, path.join("sealed").join("s-t01000-1"));
        assert!(resp.paths.has(SectorFileType::CACHE));
        assert_eq!(
            resp.storages.get(SectorFileType::SEALED),
            Some(&StorageId::from("path-a"))
        );
        store.shutdown();
    }

    #[tokio::test]
    async fn test_acquire_allocate_without_paths_fails() {
        let root = TempDir::new().unwrap();
        let (store, _index) = open_store(&root).await;
        let err = store
            .acquire_sector(
                sector_ref(1),
                SectorFileType::NONE,
                SectorFileType::SEALED,
                PathType::Sealing,
                AcquireMode::Move,
            )
            .await
            .unwrap_err();
        // No storage attached at all: the index has no candidates.
        assert!(matches!(
            err,
            StoreError::Index(kiln_index::IndexError::NoSuitableCandidate)
        ));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_acquire_existing_finds_declared_file() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);
        let sealed_dir = path.join("sealed");
        std::fs::create_dir_all(&sealed_dir).unwrap();
        std::fs::write(sealed_dir.join("s-t01000-2"), b"replica").unwrap();

        let (store, _index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        let resp = store
            .acquire_sector(
                sector_ref(2),
                SectorFileType::SEALED,
                SectorFileType::NONE,
                PathType::Sealing,
                AcquireMode::Move,
            )
            .await
            .unwrap();
        assert_eq!(
            *resp.paths.get(SectorFileType::SEALED).unwrap(),
            sealed_dir.join("s-t01000-2")
        );
        store.shutdown();
    }

    #[tokio::test]
    async fn test_reserve_accounts_and_releases() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);

        let (store, _index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        let resp = store
            .acquire_sector(
                sector_ref(1),
                SectorFileType::NONE,
                SectorFileType::SEALED,
                PathType::Sealing,
                AcquireMode::Move,
            )
            .await
            .unwrap();

        let before = store.get_fs_stat(&StorageId::from("path-a")).await.unwrap();
        let guard = store
            .reserve(
                sector_ref(1),
                SectorFileType::SEALED,
                &resp.storages,
                PathType::Sealing,
            )
            .await
            .unwrap();

        let during = store.get_fs_stat(&StorageId::from("path-a")).await.unwrap();
        assert_eq!(during.reserved, 2048);
        assert!(during.available < before.available);

        // Double reservation of the same type is rejected.
        assert!(matches!(
            store
                .reserve(
                    sector_ref(1),
                    SectorFileType::SEALED,
                    &resp.storages,
                    PathType::Sealing,
                )
                .await,
            Err(StoreError::AlreadyReserved { .. })
        ));

        drop(guard);
        let after = store.get_fs_stat(&StorageId::from("path-a")).await.unwrap();
        assert_eq!(after.reserved, 0);
        store.shutdown();
    }

    #[tokio::test]
    async fn test_reserved_bytes_consumed_by_written_file() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);

        let (store, _index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        let resp = store
            .acquire_sector(
                sector_ref(1),
                SectorFileType::NONE,
                SectorFileType::SEALED,
                PathType::Sealing,
                AcquireMode::Move,
            )
            .await
            .unwrap();
        let _guard = store
            .reserve(
                sector_ref(1),
                SectorFileType::SEALED,
                &resp.storages,
                PathType::Sealing,
            )
            .await
            .unwrap();

        // Write half the sector; the reservation shrinks accordingly.
        let artifact = resp.paths.get(SectorFileType::SEALED).unwrap();
        std::fs::write(artifact, vec![0u8; 1024]).unwrap();
        let stat = store.get_fs_stat(&StorageId::from("path-a")).await.unwrap();
        assert_eq!(stat.reserved, 1024);
        store.shutdown();
    }

    #[tokio::test]
    async fn test_remove_rejects_multi_type_mask() {
        let root = TempDir::new().unwrap();
        let (store, _index) = open_store(&root).await;
        assert!(matches!(
            store
                .remove(
                    SectorId::new(1000, 1),
                    SectorFileType::SEALED | SectorFileType::CACHE
                )
                .await,
            Err(StoreError::RemoveSeveralFileTypes(_))
        ));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_declaration() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);
        let sealed = path.join("sealed").join("s-t01000-3");
        std::fs::create_dir_all(sealed.parent().unwrap()).unwrap();
        std::fs::write(&sealed, b"replica").unwrap();

        let (store, index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();

        store
            .remove(SectorId::new(1000, 3), SectorFileType::SEALED)
            .await
            .unwrap();
        assert!(!sealed.exists());
        let found = index
            .storage_find_sector(SectorId::new(1000, 3), SectorFileType::SEALED, None)
            .await
            .unwrap();
        assert!(found.is_empty());
        store.shutdown();
    }

    #[tokio::test]
    async fn test_remove_copies_preserves_primary() {
        let root = TempDir::new().unwrap();
        let primary = root.path().join("store");
        let replica = root.path().join("seal");
        seed_path(&primary, "primary", 1, false, true);
        seed_path(&replica, "replica", 1, true, false);

        let sector = SectorId::new(1000, 4);
        for (dir, _) in [(&primary, true), (&replica, false)] {
            let file = dir.join("sealed").join(sector.to_string());
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, b"replica").unwrap();
        }

        let (store, index) = open_store(&root).await;
        // can_store paths declare as primary when opened.
        store.open_path(&primary).await.unwrap();
        store.open_path(&replica).await.unwrap();

        store
            .remove_copies(sector, SectorFileType::SEALED)
            .await
            .unwrap();

        assert!(primary.join("sealed").join(sector.to_string()).exists());
        assert!(!replica.join("sealed").join(sector.to_string()).exists());

        let found = index
            .storage_find_sector(sector, SectorFileType::SEALED, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, StorageId::from("primary"));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_remove_copies_without_primary_keeps_everything() {
        let root = TempDir::new().unwrap();
        let seal_a = root.path().join("a");
        let seal_b = root.path().join("b");
        seed_path(&seal_a, "a", 1, true, false);
        seed_path(&seal_b, "b", 1, true, false);

        let sector = SectorId::new(1000, 6);
        for dir in [&seal_a, &seal_b] {
            let file = dir.join("sealed").join(sector.to_string());
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(&file, b"replica").unwrap();
        }

        let (store, _index) = open_store(&root).await;
        store.open_path(&seal_a).await.unwrap();
        store.open_path(&seal_b).await.unwrap();

        store
            .remove_copies(sector, SectorFileType::SEALED)
            .await
            .unwrap();
        assert!(seal_a.join("sealed").join(sector.to_string()).exists());
        assert!(seal_b.join("sealed").join(sector.to_string()).exists());
        store.shutdown();
    }

    #[tokio::test]
    async fn test_move_storage_rehomes_sealing_artifacts() {
        let root = TempDir::new().unwrap();
        let scratch = root.path().join("scratch");
        let long_term = root.path().join("store");
        seed_path(&scratch, "scratch", 1, true, false);
        seed_path(&long_term, "long-term", 1, false, true);

        let sector = sector_ref(8);
        let sealed = scratch.join("sealed").join(sector.id.to_string());
        std::fs::create_dir_all(sealed.parent().unwrap()).unwrap();
        std::fs::write(&sealed, b"replica").unwrap();

        let (store, index) = open_store(&root).await;
        store.open_path(&scratch).await.unwrap();
        store.open_path(&long_term).await.unwrap();

        store
            .move_storage(sector, SectorFileType::SEALED)
            .await
            .unwrap();

        assert!(!sealed.exists());
        assert!(long_term.join("sealed").join(sector.id.to_string()).exists());

        let found = index
            .storage_find_sector(sector.id, SectorFileType::SEALED, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, StorageId::from("long-term"));
        assert!(found[0].is_primary);
        store.shutdown();
    }

    #[tokio::test]
    async fn test_get_fs_stat_unknown_storage() {
        let root = TempDir::new().unwrap();
        let (store, _index) = open_store(&root).await;
        assert!(matches!(
            store.get_fs_stat(&StorageId::from("nope")).await,
            Err(StoreError::NotFoundStorage(_))
        ));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_health_report_refreshes_index() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("seal");
        seed_path(&path, "path-a", 1, true, true);

        let (store, index) = open_store(&root).await;
        store.open_path(&path).await.unwrap();
        store.report_health().await;

        // A stat landed in the index (visible through best-alloc not
        // rejecting the path as stale).
        let ranked = index
            .storage_best_alloc(SectorFileType::SEALED, 2048, PathType::Sealing)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        store.shutdown();
    }
}
