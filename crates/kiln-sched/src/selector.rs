//! Worker-selection strategies.
//!
//! A selector answers two questions for the scheduler: can this worker
//! run the task at all (`is_satisfying`), and of two capable workers,
//! which should win (`is_preferred`). Placement-aware strategies consult
//! the index; the default preference is the lower-utilization worker.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_index::SectorIndex;
use kiln_types::{PathType, RegisteredSealProof, SectorFileType, SectorId, TaskType};

use crate::error::SchedulerError;
use crate::worker::WorkerHandle;

/// Strategy choosing which worker should run a task.
#[async_trait]
pub trait WorkerSelector: Send + Sync {
    /// Whether the worker can run the task at all.
    async fn is_satisfying(
        &self,
        task: TaskType,
        proof: RegisteredSealProof,
        worker: &WorkerHandle,
    ) -> Result<bool, SchedulerError>;

    /// Whether `challenger` should be chosen over `current_best`.
    ///
    /// Defaults to the lower current resource utilization.
    async fn is_preferred(
        &self,
        _task: TaskType,
        challenger: &WorkerHandle,
        current_best: &WorkerHandle,
    ) -> Result<bool, SchedulerError> {
        Ok(challenger.utilization() < current_best.utilization())
    }
}

/// Selects a worker by where a *new* artifact should best be produced:
/// the worker must reach one of the index's best allocation candidates.
pub struct AllocateSelector {
    index: Arc<dyn SectorIndex>,
    allocate: SectorFileType,
    path_type: PathType,
}

impl AllocateSelector {
    /// Create a selector for producing `allocate` artifacts.
    pub fn new(index: Arc<dyn SectorIndex>, allocate: SectorFileType, path_type: PathType) -> Self {
        Self {
            index,
            allocate,
            path_type,
        }
    }
}

#[async_trait]
impl WorkerSelector for AllocateSelector {
    async fn is_satisfying(
        &self,
        task: TaskType,
        proof: RegisteredSealProof,
        worker: &WorkerHandle,
    ) -> Result<bool, SchedulerError> {
        let tasks = worker.worker.supported_tasks().await?;
        if !tasks.contains(&task) {
            return Ok(false);
        }

        let paths = worker.worker.accessible_paths().await?;
        let best = self
            .index
            .storage_best_alloc(self.allocate, proof.sector_size(), self.path_type)
            .await
            .map_err(|e| SchedulerError::CannotSelectWorker(e.to_string()))?;

        Ok(best
            .iter()
            .any(|info| paths.iter().any(|p| p.id == info.id)))
    }
}

/// Selects a worker by where an *existing* artifact already lives; with
/// `allow_fetch`, locations the worker could fetch into count too.
pub struct ExistingSelector {
    index: Arc<dyn SectorIndex>,
    sector: SectorId,
    file_type: SectorFileType,
    allow_fetch: bool,
}

impl ExistingSelector {
    /// Create a selector over the sector's `file_type` artifacts.
    pub fn new(
        index: Arc<dyn SectorIndex>,
        sector: SectorId,
        file_type: SectorFileType,
        allow_fetch: bool,
    ) -> Self {
        Self {
            index,
            sector,
            file_type,
            allow_fetch,
        }
    }
}

#[async_trait]
impl WorkerSelector for ExistingSelector {
    async fn is_satisfying(
        &self,
        task: TaskType,
        proof: RegisteredSealProof,
        worker: &WorkerHandle,
    ) -> Result<bool, SchedulerError> {
        let tasks = worker.worker.supported_tasks().await?;
        if !tasks.contains(&task) {
            return Ok(false);
        }

        let paths = worker.worker.accessible_paths().await?;
        let fetch_size = self.allow_fetch.then(|| proof.sector_size());
        let holders = self
            .index
            .storage_find_sector(self.sector, self.file_type, fetch_size)
            .await
            .map_err(|e| SchedulerError::CannotSelectWorker(e.to_string()))?;

        Ok(holders
            .iter()
            .any(|info| paths.iter().any(|p| p.id == info.id)))
    }
}

/// Selects by task support alone, preferring the most specialized worker.
/// Used for pure-compute stages with no storage affinity.
pub struct TaskSelector;

impl TaskSelector {
    /// Create the task selector.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TaskSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerSelector for TaskSelector {
    async fn is_satisfying(
        &self,
        task: TaskType,
        _proof: RegisteredSealProof,
        worker: &WorkerHandle,
    ) -> Result<bool, SchedulerError> {
        Ok(worker.worker.supported_tasks().await?.contains(&task))
    }

    async fn is_preferred(
        &self,
        _task: TaskType,
        challenger: &WorkerHandle,
        current_best: &WorkerHandle,
    ) -> Result<bool, SchedulerError> {
        // A worker advertising fewer task types is more specialized;
        // leave generalists free for storage-bound stages.
        let challenger_tasks = challenger.worker.supported_tasks().await?.len();
        let best_tasks = current_best.worker.supported_tasks().await?.len();
        if challenger_tasks != best_tasks {
            return Ok(challenger_tasks < best_tasks);
        }
        Ok(challenger.utilization() < current_best.utilization())
    }
}
