//! [`StorageIndex`] — the in-process placement registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use kiln_types::{
    seal_space_use, FsStat, HealthReport, PathType, SectorFileType, SectorId, SectorSize,
    StorageId, StorageInfo,
};
use tracing::{debug, warn};
use url::Url;

use crate::error::IndexError;
use crate::locks::IndexLocks;
use crate::{SectorIndex, WLock, STALE_HEARTBEAT};

struct StorageEntry {
    info: StorageInfo,
    fs_stat: FsStat,
    last_heartbeat: Instant,
    error: Option<String>,
}

impl StorageEntry {
    fn is_healthy(&self) -> bool {
        self.error.is_none() && self.last_heartbeat.elapsed() <= STALE_HEARTBEAT
    }
}

/// Key of one placement record: a sector and a single file type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Decl {
    sector: SectorId,
    file_type: SectorFileType,
}

struct DeclMeta {
    id: StorageId,
    is_primary: bool,
}

#[derive(Default)]
struct IndexInner {
    stores: HashMap<StorageId, StorageEntry>,
    sectors: HashMap<Decl, Vec<DeclMeta>>,
}

/// The process-wide sector index. Serializes its own mutations behind a
/// single mutex; lock waits go through a separate wait queue so index
/// reads never block on lock contention.
pub struct StorageIndex {
    inner: Mutex<IndexInner>,
    locks: Arc<IndexLocks>,
}

impl StorageIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IndexInner::default()),
            locks: IndexLocks::new(),
        }
    }
}

impl Default for StorageIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite a base endpoint URL to point at a concrete sector artifact.
fn sector_url(
    base: &str,
    file_type: SectorFileType,
    sector: SectorId,
) -> Result<String, IndexError> {
    let mut url = Url::parse(base).map_err(|_| IndexError::InvalidUrl(base.to_string()))?;
    let path = format!(
        "{}/{}/{}",
        url.path().trim_end_matches('/'),
        file_type.as_str(),
        sector
    );
    url.set_path(&path);
    Ok(url.into())
}

fn validate_urls(info: &StorageInfo) -> Result<(), IndexError> {
    for u in &info.urls {
        Url::parse(u).map_err(|_| IndexError::InvalidUrl(u.clone()))?;
    }
    Ok(())
}

#[async_trait]
impl SectorIndex for StorageIndex {
    async fn storage_attach(&self, info: StorageInfo, stat: FsStat) -> Result<(), IndexError> {
        validate_urls(&info)?;

        let mut inner = self.inner.lock().expect("index poisoned");
        match inner.stores.get_mut(&info.id) {
            Some(entry) => {
                // Re-attach: descriptor fields from the new call win, the
                // URL list is merged so previously advertised endpoints
                // stay reachable.
                let mut urls = entry.info.urls.clone();
                for u in &info.urls {
                    if !urls.contains(u) {
                        urls.push(u.clone());
                    }
                }
                debug!(id = %info.id, urls = urls.len(), "storage re-attached");
                entry.info = StorageInfo { urls, ..info };
                entry.fs_stat = stat;
                entry.last_heartbeat = Instant::now();
            }
            None => {
                debug!(id = %info.id, weight = info.weight, can_seal = info.can_seal,
                       can_store = info.can_store, "storage attached");
                inner.stores.insert(
                    info.id.clone(),
                    StorageEntry {
                        info,
                        fs_stat: stat,
                        last_heartbeat: Instant::now(),
                        error: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_storage_info(&self, id: &StorageId) -> Result<StorageInfo, IndexError> {
        let inner = self.inner.lock().expect("index poisoned");
        inner
            .stores
            .get(id)
            .map(|e| e.info.clone())
            .ok_or_else(|| IndexError::StorageNotFound(id.clone()))
    }

    async fn storage_report_health(
        &self,
        id: &StorageId,
        report: HealthReport,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().expect("index poisoned");
        let entry = inner
            .stores
            .get_mut(id)
            .ok_or_else(|| IndexError::StorageNotFound(id.clone()))?;
        entry.fs_stat = report.stat;
        entry.error = report.error;
        entry.last_heartbeat = Instant::now();
        Ok(())
    }

    async fn storage_declare_sector(
        &self,
        id: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
        primary: bool,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().expect("index poisoned");
        for t in file_type.iter() {
            let decls = inner
                .sectors
                .entry(Decl {
                    sector,
                    file_type: t,
                })
                .or_default();

            if let Some(existing) = decls.iter_mut().find(|d| d.id == *id) {
                if primary && !existing.is_primary {
                    existing.is_primary = true;
                } else {
                    warn!(%sector, file_type = %t, storage = %id, "sector redeclared");
                }
                continue;
            }

            decls.push(DeclMeta {
                id: id.clone(),
                is_primary: primary,
            });
            debug!(%sector, file_type = %t, storage = %id, primary, "sector declared");
        }
        Ok(())
    }

    async fn storage_drop_sector(
        &self,
        id: &StorageId,
        sector: SectorId,
        file_type: SectorFileType,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().expect("index poisoned");
        for t in file_type.iter() {
            let key = Decl {
                sector,
                file_type: t,
            };
            if let Some(decls) = inner.sectors.get_mut(&key) {
                decls.retain(|d| d.id != *id);
                if decls.is_empty() {
                    inner.sectors.remove(&key);
                }
                debug!(%sector, file_type = %t, storage = %id, "sector dropped");
            }
        }
        Ok(())
    }

    async fn storage_find_sector(
        &self,
        sector: SectorId,
        file_type: SectorFileType,
        fetch_size: Option<SectorSize>,
    ) -> Result<Vec<StorageInfo>, IndexError> {
        let inner = self.inner.lock().expect("index poisoned");

        // How many of the requested types each declaring storage holds,
        // and whether any declaration is primary.
        let mut holders: HashMap<StorageId, (u64, bool)> = HashMap::new();
        for t in file_type.iter() {
            if let Some(decls) = inner.sectors.get(&Decl {
                sector,
                file_type: t,
            }) {
                for d in decls {
                    let e = holders.entry(d.id.clone()).or_insert((0, false));
                    e.0 += 1;
                    e.1 |= d.is_primary;
                }
            }
        }

        let mut result = Vec::new();
        for (id, (count, is_primary)) in &holders {
            let Some(entry) = inner.stores.get(id) else {
                warn!(storage = %id, "declared storage missing from registry");
                continue;
            };

            let mut info = entry.info.clone();
            let mut urls = Vec::with_capacity(info.urls.len());
            for u in &info.urls {
                urls.push(sector_url(u, file_type, sector)?);
            }
            info.urls = urls;
            info.weight = entry.info.weight * count;
            info.is_primary = *is_primary;
            result.push(info);
        }

        if let Some(size) = fetch_size {
            let required = seal_space_use(file_type, size)?;
            for (id, entry) in &inner.stores {
                if holders.contains_key(id) {
                    continue;
                }
                if !entry.info.can_seal {
                    continue;
                }
                if required > entry.fs_stat.available {
                    debug!(storage = %id, available = entry.fs_stat.available,
                           need = required, "fetch destination out of space");
                    continue;
                }
                if !entry.is_healthy() {
                    debug!(storage = %id, "fetch destination unhealthy");
                    continue;
                }

                let mut info = entry.info.clone();
                let mut urls = Vec::with_capacity(info.urls.len());
                for u in &info.urls {
                    urls.push(sector_url(u, file_type, sector)?);
                }
                info.urls = urls;
                info.weight = 0;
                info.is_primary = false;
                result.push(info);
            }
        }

        Ok(result)
    }

    async fn storage_best_alloc(
        &self,
        allocate: SectorFileType,
        sector_size: SectorSize,
        path_type: PathType,
    ) -> Result<Vec<StorageInfo>, IndexError> {
        let required = seal_space_use(allocate, sector_size)?;
        let inner = self.inner.lock().expect("index poisoned");

        let mut candidates: Vec<(&StorageEntry, u64)> = Vec::new();
        for entry in inner.stores.values() {
            let capable = match path_type {
                PathType::Sealing => entry.info.can_seal,
                PathType::Storage => entry.info.can_store,
            };
            if !capable {
                continue;
            }
            if required > entry.fs_stat.available {
                continue;
            }
            if !entry.is_healthy() {
                continue;
            }
            // Tunable scoring: free-space headroom scaled by the
            // configured weight; a zero weight still competes on space.
            let score = entry.fs_stat.available * entry.info.weight.max(1);
            candidates.push((entry, score));
        }

        if candidates.is_empty() {
            return Err(IndexError::NoSuitableCandidate);
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(candidates.into_iter().map(|(e, _)| e.info.clone()).collect())
    }

    async fn storage_lock(
        &self,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Result<WLock, IndexError> {
        let overlap = read.intersect(write);
        if !overlap.is_empty() {
            return Err(IndexError::CannotLockStorage(overlap));
        }
        Ok(self.locks.acquire(sector, read, write).await)
    }

    fn storage_try_lock(
        &self,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Option<WLock> {
        if read.intersects(write) {
            return None;
        }
        self.locks.try_acquire(sector, read, write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, weight: u64, can_seal: bool, can_store: bool) -> StorageInfo {
        StorageInfo {
            id: StorageId::from(id),
            urls: vec![format!("http://{id}.example:3456/remote")],
            weight,
            can_seal,
            can_store,
            is_primary: false,
        }
    }

    fn stat(available: u64) -> FsStat {
        FsStat {
            capacity: available * 2,
            available,
            reserved: 0,
        }
    }

    fn sector() -> SectorId {
        SectorId::new(1000, 1)
    }

    #[tokio::test]
    async fn test_attach_then_get() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("a", 10, true, true), stat(1 << 30))
            .await
            .unwrap();
        let got = index.get_storage_info(&StorageId::from("a")).await.unwrap();
        assert_eq!(got.weight, 10);
    }

    #[tokio::test]
    async fn test_get_unknown_storage_fails() {
        let index = StorageIndex::new();
        let err = index
            .get_storage_info(&StorageId::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn test_attach_rejects_invalid_url() {
        let index = StorageIndex::new();
        let mut bad = info("a", 1, true, true);
        bad.urls = vec!["not a url".to_string()];
        assert!(matches!(
            index.storage_attach(bad, stat(100)).await,
            Err(IndexError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_is_upsert_second_fields_win() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("a", 10, true, false), stat(100))
            .await
            .unwrap();
        let mut second = info("a", 20, false, true);
        second.urls = vec!["http://other.example/remote".to_string()];
        index.storage_attach(second, stat(100)).await.unwrap();

        let got = index.get_storage_info(&StorageId::from("a")).await.unwrap();
        assert_eq!(got.weight, 20);
        assert!(!got.can_seal);
        assert!(got.can_store);
        // URLs merged, not replaced.
        assert_eq!(got.urls.len(), 2);
    }

    #[tokio::test]
    async fn test_declare_then_find_then_drop() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("a", 10, true, true), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_declare_sector(&StorageId::from("a"), sector(), SectorFileType::SEALED, true)
            .await
            .unwrap();

        let found = index
            .storage_find_sector(sector(), SectorFileType::SEALED, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, StorageId::from("a"));
        assert!(found[0].is_primary);
        // URL rewritten to the concrete artifact.
        assert!(found[0].urls[0].ends_with("/remote/sealed/s-t01000-1"));

        index
            .storage_drop_sector(&StorageId::from("a"), sector(), SectorFileType::SEALED)
            .await
            .unwrap();
        let found = index
            .storage_find_sector(sector(), SectorFileType::SEALED, None)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_find_multiplies_weight_by_held_types() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("a", 5, true, true), stat(1 << 30))
            .await
            .unwrap();
        let mask = SectorFileType::SEALED | SectorFileType::CACHE;
        index
            .storage_declare_sector(&StorageId::from("a"), sector(), mask, false)
            .await
            .unwrap();

        let found = index.storage_find_sector(sector(), mask, None).await.unwrap();
        assert_eq!(found[0].weight, 10);
    }

    #[tokio::test]
    async fn test_find_with_fetch_size_appends_eligible_destinations() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("holder", 10, true, true), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_attach(info("spare", 10, true, false), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_attach(info("tiny", 10, true, false), stat(16))
            .await
            .unwrap();
        index
            .storage_attach(info("no-seal", 10, false, true), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_declare_sector(
                &StorageId::from("holder"),
                sector(),
                SectorFileType::UNSEALED,
                true,
            )
            .await
            .unwrap();

        // Without fetch size only the holder shows up.
        let found = index
            .storage_find_sector(sector(), SectorFileType::UNSEALED, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        // With fetch size the spare (can-seal, roomy) is appended at
        // weight 0; the tiny and non-sealing stores are not.
        let found = index
            .storage_find_sector(sector(), SectorFileType::UNSEALED, Some(2048))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|i| i.id.as_str().to_string()).collect();
        assert!(ids.contains(&"holder".to_string()));
        assert!(ids.contains(&"spare".to_string()));
        assert!(!ids.contains(&"tiny".to_string()));
        assert!(!ids.contains(&"no-seal".to_string()));
        let spare = found.iter().find(|i| i.id.as_str() == "spare").unwrap();
        assert_eq!(spare.weight, 0);
    }

    #[tokio::test]
    async fn test_best_alloc_filters_capability() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("seal-only", 10, true, false), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_attach(info("store-only", 10, false, true), stat(1 << 30))
            .await
            .unwrap();

        let sealing = index
            .storage_best_alloc(SectorFileType::SEALED, 2048, PathType::Sealing)
            .await
            .unwrap();
        assert_eq!(sealing.len(), 1);
        assert_eq!(sealing[0].id, StorageId::from("seal-only"));

        let storing = index
            .storage_best_alloc(SectorFileType::SEALED, 2048, PathType::Storage)
            .await
            .unwrap();
        assert_eq!(storing.len(), 1);
        assert_eq!(storing[0].id, StorageId::from("store-only"));
    }

    #[tokio::test]
    async fn test_best_alloc_prefers_headroom_and_weight() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("small", 1, true, true), stat(1 << 20))
            .await
            .unwrap();
        index
            .storage_attach(info("big", 1, true, true), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_attach(info("weighted", 4096, true, true), stat(1 << 20))
            .await
            .unwrap();

        let ranked = index
            .storage_best_alloc(SectorFileType::SEALED, 2048, PathType::Sealing)
            .await
            .unwrap();
        let ids: Vec<_> = ranked.iter().map(|i| i.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["weighted", "big", "small"]);
    }

    #[tokio::test]
    async fn test_best_alloc_no_candidates() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("full", 10, true, true), stat(0))
            .await
            .unwrap();
        assert!(matches!(
            index
                .storage_best_alloc(SectorFileType::SEALED, 2048, PathType::Sealing)
                .await,
            Err(IndexError::NoSuitableCandidate)
        ));
    }

    #[tokio::test]
    async fn test_best_alloc_skips_errored_storage() {
        let index = StorageIndex::new();
        index
            .storage_attach(info("sick", 10, true, true), stat(1 << 30))
            .await
            .unwrap();
        index
            .storage_report_health(
                &StorageId::from("sick"),
                HealthReport {
                    stat: stat(1 << 30),
                    error: Some("io error".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            index
                .storage_best_alloc(SectorFileType::SEALED, 2048, PathType::Sealing)
                .await,
            Err(IndexError::NoSuitableCandidate)
        ));
    }

    #[tokio::test]
    async fn test_lock_rejects_overlapping_masks() {
        let index = StorageIndex::new();
        let err = index
            .storage_lock(sector(), SectorFileType::SEALED, SectorFileType::SEALED)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CannotLockStorage(_)));
    }

    #[tokio::test]
    async fn test_try_lock_on_held_write_returns_none_immediately() {
        let index = StorageIndex::new();
        let _held = index
            .storage_try_lock(sector(), SectorFileType::NONE, SectorFileType::SEALED)
            .unwrap();
        assert!(index
            .storage_try_lock(sector(), SectorFileType::SEALED, SectorFileType::NONE)
            .is_none());
    }

    #[tokio::test]
    async fn test_overlapping_writes_serialize() {
        let index = Arc::new(StorageIndex::new());
        let first = index
            .storage_lock(sector(), SectorFileType::NONE, SectorFileType::CACHE)
            .await
            .unwrap();

        let index2 = Arc::clone(&index);
        let second = tokio::spawn(async move {
            index2
                .storage_lock(sector(), SectorFileType::NONE, SectorFileType::CACHE)
                .await
        });

        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        drop(first);
        let lock = tokio::time::timeout(std::time::Duration::from_secs(1), second)
            .await
            .expect("second locker timed out")
            .unwrap()
            .unwrap();
        assert_eq!(lock.write_mask(), SectorFileType::CACHE);
    }
}
