//! Work fingerprints and persisted work state.
//!
//! A [`WorkId`] is a deterministic fingerprint of `(task type, argument
//! tuple)`; identical concurrent requests share one execution. Work
//! states are persisted in a fjall keyspace so that an in-progress call
//! can be re-joined after a restart; anything not in progress is purged
//! on startup.

use std::fmt;
use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use kiln_types::{CallId, TaskType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SchedulerError;

/// Deterministic fingerprint of a schedulable piece of work.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId([u8; 32]);

impl WorkId {
    /// Fingerprint a task and its canonicalized argument tuple.
    ///
    /// Arguments are serialized as JSON; field order is fixed by the
    /// argument struct, which keeps the encoding canonical per task.
    pub fn of<T: Serialize>(task: TaskType, args: &T) -> Result<Self, SchedulerError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(task.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(&serde_json::to_vec(args)?);
        Ok(Self(hasher.finalize().into()))
    }

    /// Return the raw 32-byte representation.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkId({self})")
    }
}

/// Progress of a tracked piece of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    /// Accepted but not yet handed to a worker.
    Start,
    /// Running on a worker under the recorded call id.
    InProgress,
}

/// Persisted state of one tracked piece of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkState {
    /// The work fingerprint.
    pub id: WorkId,
    /// Current status.
    pub status: WorkStatus,
    /// The call executing this work, once dispatched.
    pub call_id: Option<CallId>,
}

/// Fjall-backed store of [`WorkState`] entries, keyed by [`WorkId`].
pub struct WorkTracker {
    #[allow(dead_code)]
    db: Database,
    works: Keyspace,
}

impl WorkTracker {
    /// Open a persistent tracker at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let db = Database::builder(path).open()?;
        Self::init(db)
    }

    /// Open a temporary tracker that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self, SchedulerError> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, SchedulerError> {
        let works = db.keyspace("works", KeyspaceCreateOptions::default)?;
        Ok(Self { db, works })
    }

    /// Store or update a work state.
    pub fn put(&self, state: &WorkState) -> Result<(), SchedulerError> {
        let value = serde_json::to_vec(state)?;
        self.works.insert(state.id.as_bytes(), value.as_slice())?;
        Ok(())
    }

    /// Look up a work state.
    pub fn get(&self, id: &WorkId) -> Result<Option<WorkState>, SchedulerError> {
        match self.works.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a work state.
    pub fn remove(&self, id: &WorkId) -> Result<(), SchedulerError> {
        self.works.remove(id.as_bytes())?;
        Ok(())
    }

    /// Startup sweep: drop every entry that never reached a worker. An
    /// in-progress entry stays so a re-scheduled identical request can
    /// re-join its call.
    pub fn reset_works(&self) -> Result<(), SchedulerError> {
        let mut stale = Vec::new();
        for guard in self.works.iter() {
            let value = guard.value()?;
            let state: WorkState = serde_json::from_slice(&value)?;
            if state.status != WorkStatus::InProgress {
                stale.push(state.id);
            }
        }
        for id in stale {
            debug!(work_id = %id, "purging stale work state");
            self.works.remove(id.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::SectorId;

    #[derive(Serialize)]
    struct Args {
        sector: SectorId,
        ticket: [u8; 32],
    }

    fn args(number: u64) -> Args {
        Args {
            sector: SectorId::new(1000, number),
            ticket: [7u8; 32],
        }
    }

    #[test]
    fn test_work_id_deterministic() {
        let a = WorkId::of(TaskType::PreCommit1, &args(1)).unwrap();
        let b = WorkId::of(TaskType::PreCommit1, &args(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_work_id_distinguishes_args_and_task() {
        let base = WorkId::of(TaskType::PreCommit1, &args(1)).unwrap();
        assert_ne!(base, WorkId::of(TaskType::PreCommit1, &args(2)).unwrap());
        assert_ne!(base, WorkId::of(TaskType::PreCommit2, &args(1)).unwrap());
    }

    #[test]
    fn test_tracker_roundtrip() {
        let tracker = WorkTracker::open_temporary().unwrap();
        let id = WorkId::of(TaskType::AddPiece, &args(1)).unwrap();
        let state = WorkState {
            id,
            status: WorkStatus::Start,
            call_id: None,
        };
        tracker.put(&state).unwrap();

        let loaded = tracker.get(&id).unwrap().unwrap();
        assert_eq!(loaded.status, WorkStatus::Start);
        assert!(loaded.call_id.is_none());

        tracker.remove(&id).unwrap();
        assert!(tracker.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_reset_works_purges_only_unstarted() {
        let tracker = WorkTracker::open_temporary().unwrap();
        let started = WorkId::of(TaskType::AddPiece, &args(1)).unwrap();
        let running = WorkId::of(TaskType::AddPiece, &args(2)).unwrap();

        tracker
            .put(&WorkState {
                id: started,
                status: WorkStatus::Start,
                call_id: None,
            })
            .unwrap();
        tracker
            .put(&WorkState {
                id: running,
                status: WorkStatus::InProgress,
                call_id: Some(CallId::new(SectorId::new(1000, 2))),
            })
            .unwrap();

        tracker.reset_works().unwrap();
        assert!(tracker.get(&started).unwrap().is_none());
        assert!(tracker.get(&running).unwrap().is_some());
    }
}
