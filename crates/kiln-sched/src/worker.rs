//! The worker protocol and the scheduler's per-worker handle.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use kiln_types::{
    AcquireMode, CallError, CallId, CallResult, Commit1Output, Commitment, InteractiveRandomness,
    PathType, PieceInfo, PreCommit1Output, Range, SealRandomness, SectorCids, SectorFileType,
    SectorId, SectorRef, StoragePath, TaskType, UnpaddedByteIndex, UnpaddedPieceSize, WorkerInfo,
};

use crate::resources::ActiveResources;

/// Sink for asynchronous call results: every accepted call's outcome is
/// pushed back through this seam, exactly once per [`CallId`].
pub trait WorkerReturn: Send + Sync {
    /// Deliver the result of a call.
    fn return_result(&self, call_id: CallId, result: CallResult);
}

/// A pipeline-stage executor.
///
/// Every stage method validates and accepts the call, returning a
/// [`CallId`] immediately; the eventual result arrives out-of-band
/// through the worker's [`WorkerReturn`] channel.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Identity and hardware resources.
    async fn info(&self) -> Result<WorkerInfo, CallError>;

    /// Task types this worker accepts.
    async fn supported_tasks(&self) -> Result<HashSet<TaskType>, CallError>;

    /// Storage paths this worker can reach directly.
    async fn accessible_paths(&self) -> Result<Vec<StoragePath>, CallError>;

    /// Write a piece into the sector's unsealed file.
    async fn add_piece(
        &self,
        sector: SectorRef,
        existing_sizes: Vec<UnpaddedPieceSize>,
        size: UnpaddedPieceSize,
        data: Bytes,
    ) -> Result<CallId, CallError>;

    /// First pre-commit phase.
    async fn seal_pre_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        pieces: Vec<PieceInfo>,
    ) -> Result<CallId, CallError>;

    /// Second pre-commit phase.
    async fn seal_pre_commit2(
        &self,
        sector: SectorRef,
        phase1_output: PreCommit1Output,
    ) -> Result<CallId, CallError>;

    /// First commit phase.
    async fn seal_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        seed: InteractiveRandomness,
        pieces: Vec<PieceInfo>,
        cids: SectorCids,
    ) -> Result<CallId, CallError>;

    /// Second commit phase.
    async fn seal_commit2(
        &self,
        sector: SectorRef,
        phase1_output: Commit1Output,
    ) -> Result<CallId, CallError>;

    /// Prune seal scratch, keeping the given unsealed ranges.
    async fn finalize_sector(
        &self,
        sector: SectorRef,
        keep_unsealed: Vec<Range>,
    ) -> Result<CallId, CallError>;

    /// Migrate artifacts to long-term storage.
    async fn move_storage(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
    ) -> Result<CallId, CallError>;

    /// Fetch artifacts from peers into local paths.
    async fn fetch(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> Result<CallId, CallError>;

    /// Unseal a payload range out of the sealed replica.
    async fn unseal_piece(
        &self,
        sector: SectorRef,
        offset: UnpaddedByteIndex,
        size: UnpaddedPieceSize,
        randomness: SealRandomness,
        unsealed_cid: Commitment,
    ) -> Result<CallId, CallError>;

    /// Read a payload range from the unsealed file into `output`.
    async fn read_piece(
        &self,
        output: PathBuf,
        sector: SectorRef,
        offset: UnpaddedByteIndex,
        size: UnpaddedPieceSize,
    ) -> Result<CallId, CallError>;

    /// Produce an updated replica from new pieces.
    async fn replica_update(
        &self,
        sector: SectorRef,
        pieces: Vec<PieceInfo>,
    ) -> Result<CallId, CallError>;

    /// First phase of the replica-update proof.
    async fn prove_replica_update1(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
    ) -> Result<CallId, CallError>;

    /// Second phase of the replica-update proof.
    async fn prove_replica_update2(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
        vanilla_proofs: Vec<Vec<u8>>,
    ) -> Result<CallId, CallError>;

    /// Delete every artifact of the sector this worker can reach.
    async fn remove(&self, sector: SectorId) -> Result<CallId, CallError>;
}

/// The scheduler's view of a registered worker: the protocol handle plus
/// the resource windows used for admission and preference.
pub struct WorkerHandle {
    /// The worker protocol endpoint.
    pub worker: Arc<dyn Worker>,
    /// Identity and hardware resources, captured at registration.
    pub info: WorkerInfo,
    /// Resources held by tasks in their prepare phase.
    pub preparing: Mutex<ActiveResources>,
    /// Resources held by running tasks.
    pub active: Mutex<ActiveResources>,
}

impl WorkerHandle {
    /// Wrap a worker with empty resource windows.
    pub fn new(worker: Arc<dyn Worker>, info: WorkerInfo) -> Self {
        Self {
            worker,
            info,
            preparing: Mutex::new(ActiveResources::default()),
            active: Mutex::new(ActiveResources::default()),
        }
    }

    /// Combined utilization of both resource windows; lower is preferred.
    pub fn utilization(&self) -> f64 {
        let preparing = self
            .preparing
            .lock()
            .expect("preparing window poisoned")
            .utilization(&self.info.resources);
        let active = self
            .active
            .lock()
            .expect("active window poisoned")
            .utilization(&self.info.resources);
        preparing + active
    }
}
