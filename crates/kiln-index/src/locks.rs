//! Per-sector, per-file-type read/write locks.
//!
//! Writers are exclusive per file type; readers share. Different file
//! types on the same sector never conflict. Waiters queue on a
//! [`Notify`] rather than retrying with backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kiln_types::{SectorFileType, SectorId};
use tokio::sync::Notify;
use tracing::trace;

/// Number of primitive file types (slots in the reader-count table).
const TYPE_SLOTS: usize = SectorFileType::ALL.len();

fn slot(t: SectorFileType) -> usize {
    SectorFileType::ALL
        .iter()
        .position(|x| *x == t)
        .unwrap_or(0)
}

#[derive(Default)]
struct SectorLockState {
    /// Outstanding readers per file type.
    readers: [usize; TYPE_SLOTS],
    /// File types currently write-locked.
    write: SectorFileType,
}

impl SectorLockState {
    fn is_free(&self) -> bool {
        self.write.is_empty() && self.readers.iter().all(|r| *r == 0)
    }

    fn conflicts(&self, read: SectorFileType, write: SectorFileType) -> bool {
        for t in write.iter() {
            if self.write.contains(t) || self.readers[slot(t)] > 0 {
                return true;
            }
        }
        for t in read.iter() {
            if self.write.contains(t) {
                return true;
            }
        }
        false
    }

    fn take(&mut self, read: SectorFileType, write: SectorFileType) {
        for t in read.iter() {
            self.readers[slot(t)] += 1;
        }
        self.write = self.write.union(write);
    }

    fn release(&mut self, read: SectorFileType, write: SectorFileType) {
        for t in read.iter() {
            self.readers[slot(t)] = self.readers[slot(t)].saturating_sub(1);
        }
        self.write = self.write.without(write);
    }
}

/// The shared lock table for all sectors.
pub(crate) struct IndexLocks {
    table: Mutex<HashMap<SectorId, SectorLockState>>,
    released: Notify,
}

impl IndexLocks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(HashMap::new()),
            released: Notify::new(),
        })
    }

    /// Single non-blocking acquisition attempt.
    pub(crate) fn try_acquire(
        self: &Arc<Self>,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> Option<WLock> {
        let mut table = self.table.lock().expect("lock table poisoned");
        let state = table.entry(sector).or_default();
        if state.conflicts(read, write) {
            return None;
        }
        state.take(read, write);
        trace!(%sector, %read, %write, "storage lock acquired");
        Some(WLock {
            locks: Arc::clone(self),
            sector,
            read,
            write,
        })
    }

    /// Blocking acquisition: waits until the masks no longer conflict.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        sector: SectorId,
        read: SectorFileType,
        write: SectorFileType,
    ) -> WLock {
        loop {
            // Register for wakeup before checking, so a release between
            // the failed attempt and the await cannot be missed.
            let released = self.released.notified();
            if let Some(lock) = self.try_acquire(sector, read, write) {
                return lock;
            }
            trace!(%sector, %read, %write, "waiting for storage lock");
            released.await;
        }
    }

    fn release(&self, sector: SectorId, read: SectorFileType, write: SectorFileType) {
        let mut table = self.table.lock().expect("lock table poisoned");
        if let Some(state) = table.get_mut(&sector) {
            state.release(read, write);
            if state.is_free() {
                table.remove(&sector);
            }
        }
        drop(table);
        trace!(%sector, %read, %write, "storage lock released");
        self.released.notify_waiters();
    }
}

/// An acquired lock token. Releasing returns the read/write bits to the
/// pool; release happens on drop, on every exit path.
pub struct WLock {
    locks: Arc<IndexLocks>,
    sector: SectorId,
    read: SectorFileType,
    write: SectorFileType,
}

impl WLock {
    /// The sector this lock covers.
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    /// The file types held for reading.
    pub fn read_mask(&self) -> SectorFileType {
        self.read
    }

    /// The file types held for writing.
    pub fn write_mask(&self) -> SectorFileType {
        self.write
    }
}

impl Drop for WLock {
    fn drop(&mut self) {
        self.locks.release(self.sector, self.read, self.write);
    }
}

impl std::fmt::Debug for WLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WLock")
            .field("sector", &self.sector)
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector() -> SectorId {
        SectorId::new(1000, 1)
    }

    #[tokio::test]
    async fn test_try_acquire_conflicting_write_fails() {
        let locks = IndexLocks::new();
        let _held = locks
            .try_acquire(sector(), SectorFileType::NONE, SectorFileType::SEALED)
            .unwrap();
        assert!(locks
            .try_acquire(sector(), SectorFileType::NONE, SectorFileType::SEALED)
            .is_none());
        assert!(locks
            .try_acquire(sector(), SectorFileType::SEALED, SectorFileType::NONE)
            .is_none());
    }

    #[tokio::test]
    async fn test_readers_share() {
        let locks = IndexLocks::new();
        let _r1 = locks
            .try_acquire(sector(), SectorFileType::SEALED, SectorFileType::NONE)
            .unwrap();
        let _r2 = locks
            .try_acquire(sector(), SectorFileType::SEALED, SectorFileType::NONE)
            .unwrap();
        // A writer must wait for both readers.
        assert!(locks
            .try_acquire(sector(), SectorFileType::NONE, SectorFileType::SEALED)
            .is_none());
    }

    #[tokio::test]
    async fn test_different_file_types_are_independent() {
        let locks = IndexLocks::new();
        let _w1 = locks
            .try_acquire(sector(), SectorFileType::NONE, SectorFileType::SEALED)
            .unwrap();
        assert!(locks
            .try_acquire(sector(), SectorFileType::NONE, SectorFileType::UNSEALED)
            .is_some());
    }

    #[tokio::test]
    async fn test_different_sectors_are_independent() {
        let locks = IndexLocks::new();
        let _w1 = locks
            .try_acquire(SectorId::new(1, 1), SectorFileType::NONE, SectorFileType::SEALED)
            .unwrap();
        assert!(locks
            .try_acquire(SectorId::new(1, 2), SectorFileType::NONE, SectorFileType::SEALED)
            .is_some());
    }

    #[tokio::test]
    async fn test_drop_releases_and_wakes_waiter() {
        let locks = IndexLocks::new();
        let held = locks
            .try_acquire(sector(), SectorFileType::NONE, SectorFileType::SEALED)
            .unwrap();

        let locks2 = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            locks2
                .acquire(sector(), SectorFileType::NONE, SectorFileType::SEALED)
                .await
        });

        // Give the waiter a chance to queue, then release.
        tokio::task::yield_now().await;
        drop(held);

        let lock = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
        assert_eq!(lock.write_mask(), SectorFileType::SEALED);
    }

    #[tokio::test]
    async fn test_table_entry_removed_when_free() {
        let locks = IndexLocks::new();
        let held = locks
            .try_acquire(sector(), SectorFileType::CACHE, SectorFileType::SEALED)
            .unwrap();
        drop(held);
        assert!(locks.table.lock().unwrap().is_empty());
    }
}
