//! A configurable in-process worker for scheduler and selector tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_types::{
    AcquireMode, CallError, CallId, CallOutput, Commit1Output, Commitment, InteractiveRandomness,
    PathType, PieceInfo, PreCommit1Output, Range, SealRandomness, SectorCids, SectorFileType,
    SectorId, SectorRef, StorageId, StoragePath, TaskType, UnpaddedByteIndex, UnpaddedPieceSize,
    WorkerInfo, WorkerResources,
};

use crate::worker::{Worker, WorkerHandle, WorkerReturn};

/// Test worker: accepts a configured task set, advertises configured
/// paths, and resolves every stage call with a canned output after an
/// optional delay.
pub struct TestWorker {
    tasks: HashSet<TaskType>,
    paths: Vec<StoragePath>,
    info: Mutex<WorkerInfo>,
    /// Result sink; stage calls resolve only once this is wired.
    ret: Mutex<Option<Arc<dyn WorkerReturn>>>,
    delay: Mutex<Option<Duration>>,
    /// Number of stage calls accepted.
    pub executions: AtomicUsize,
}

impl TestWorker {
    pub fn new(tasks: &[TaskType], path_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tasks: tasks.iter().copied().collect(),
            paths: path_ids
                .iter()
                .map(|id| StoragePath {
                    id: StorageId::from(*id),
                    weight: 1,
                    local_path: format!("/data/{id}").into(),
                    can_seal: true,
                    can_store: true,
                })
                .collect(),
            info: Mutex::new(WorkerInfo {
                hostname: "test-worker".to_string(),
                resources: WorkerResources {
                    physical_memory: 64 << 30,
                    swap_memory: 16 << 30,
                    reserved_memory: 0,
                    cpus: 16,
                    gpus: Vec::new(),
                },
            }),
            ret: Mutex::new(None),
            delay: Mutex::new(None),
            executions: AtomicUsize::new(0),
        })
    }

    /// Wire the result sink (usually the scheduler).
    pub fn connect(&self, ret: Arc<dyn WorkerReturn>) {
        *self.ret.lock().unwrap() = Some(ret);
    }

    /// Delay each stage's result by the given duration.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Shrink the advertised CPU count (before registration).
    pub fn set_cpus(&self, cpus: u64) {
        self.info.lock().unwrap().resources.cpus = cpus;
    }

    /// Build a scheduler-side handle for this worker.
    pub fn handle(self: &Arc<Self>) -> WorkerHandle {
        WorkerHandle::new(self.clone(), self.info.lock().unwrap().clone())
    }

    fn submit(&self, sector: SectorId, output: CallOutput) -> Result<CallId, CallError> {
        let call_id = CallId::new(sector);
        self.executions.fetch_add(1, Ordering::SeqCst);
        let ret = self.ret.lock().unwrap().clone();
        let delay = *self.delay.lock().unwrap();
        if let Some(ret) = ret {
            tokio::spawn(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                ret.return_result(call_id, Ok(output));
            });
        }
        Ok(call_id)
    }
}

#[async_trait]
impl Worker for TestWorker {
    async fn info(&self) -> Result<WorkerInfo, CallError> {
        Ok(self.info.lock().unwrap().clone())
    }

    async fn supported_tasks(&self) -> Result<HashSet<TaskType>, CallError> {
        Ok(self.tasks.clone())
    }

    async fn accessible_paths(&self) -> Result<Vec<StoragePath>, CallError> {
        Ok(self.paths.clone())
    }

    async fn add_piece(
        &self,
        sector: SectorRef,
        _existing_sizes: Vec<UnpaddedPieceSize>,
        size: UnpaddedPieceSize,
        data: Bytes,
    ) -> Result<CallId, CallError> {
        self.submit(
            sector.id,
            CallOutput::Piece(PieceInfo {
                size: size.padded(),
                cid: Commitment::from_data(&data),
            }),
        )
    }

    async fn seal_pre_commit1(
        &self,
        sector: SectorRef,
        _ticket: SealRandomness,
        _pieces: Vec<PieceInfo>,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::PreCommit1(b"pc1".to_vec()))
    }

    async fn seal_pre_commit2(
        &self,
        sector: SectorRef,
        phase1_output: PreCommit1Output,
    ) -> Result<CallId, CallError> {
        self.submit(
            sector.id,
            CallOutput::SectorCids(SectorCids {
                sealed_cid: Commitment::from_data(&phase1_output),
                unsealed_cid: Commitment::from_data(b"unsealed"),
            }),
        )
    }

    async fn seal_commit1(
        &self,
        sector: SectorRef,
        _ticket: SealRandomness,
        _seed: InteractiveRandomness,
        _pieces: Vec<PieceInfo>,
        _cids: SectorCids,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Commit1(b"c1".to_vec()))
    }

    async fn seal_commit2(
        &self,
        sector: SectorRef,
        phase1_output: Commit1Output,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Proof(phase1_output))
    }

    async fn finalize_sector(
        &self,
        sector: SectorRef,
        _keep_unsealed: Vec<Range>,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Unit)
    }

    async fn move_storage(
        &self,
        sector: SectorRef,
        _file_type: SectorFileType,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Unit)
    }

    async fn fetch(
        &self,
        sector: SectorRef,
        _file_type: SectorFileType,
        _path_type: PathType,
        _mode: AcquireMode,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Unit)
    }

    async fn unseal_piece(
        &self,
        sector: SectorRef,
        _offset: UnpaddedByteIndex,
        _size: UnpaddedPieceSize,
        _randomness: SealRandomness,
        _unsealed_cid: Commitment,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Unit)
    }

    async fn read_piece(
        &self,
        _output: PathBuf,
        sector: SectorRef,
        _offset: UnpaddedByteIndex,
        _size: UnpaddedPieceSize,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Bool(true))
    }

    async fn replica_update(
        &self,
        sector: SectorRef,
        _pieces: Vec<PieceInfo>,
    ) -> Result<CallId, CallError> {
        self.submit(
            sector.id,
            CallOutput::SectorCids(SectorCids {
                sealed_cid: Commitment::from_data(b"updated"),
                unsealed_cid: Commitment::from_data(b"updated-unsealed"),
            }),
        )
    }

    async fn prove_replica_update1(
        &self,
        sector: SectorRef,
        _sector_key: Commitment,
        _new_sealed: Commitment,
        _new_unsealed: Commitment,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::VanillaProofs(vec![b"vanilla".to_vec()]))
    }

    async fn prove_replica_update2(
        &self,
        sector: SectorRef,
        _sector_key: Commitment,
        _new_sealed: Commitment,
        _new_unsealed: Commitment,
        _vanilla_proofs: Vec<Vec<u8>>,
    ) -> Result<CallId, CallError> {
        self.submit(sector.id, CallOutput::Proof(b"update-proof".to_vec()))
    }

    async fn remove(&self, sector: SectorId) -> Result<CallId, CallError> {
        self.submit(sector, CallOutput::Unit)
    }
}
