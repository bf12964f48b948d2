//! [`SectorManager`] — the pipeline façade.
//!
//! Every public operation follows the same sequence: compute the stage's
//! existing/allocate file-type masks, acquire the storage lock (held by
//! a guard for the whole operation), build the right selector, schedule
//! with a deduplicating work id, decode the tagged result, and release
//! the lock on every exit path when the guard drops.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use kiln_index::SectorIndex;
use kiln_sched::{
    ActionFuture, AllocateSelector, ExistingSelector, ReturnCallback, Scheduler, TaskSelector,
    WorkId, Worker, WorkerAction, WorkerReturn, WorkerSelector,
};
use kiln_store::{LocalStore, RemoteStore, Store};
use kiln_types::{
    ActorId, CallError, CallOutput, Commit1Output, Commitment, FsStat, InteractiveRandomness,
    PathType, PieceInfo, PoStProof, PoStRandomness, PreCommit1Output, Proof, Range,
    RegisteredSealProof, SealRandomness, SectorCids, SectorFileType, SectorId, SectorInfo,
    SectorNumber, SectorRef, StorageId, TaskType, UnpaddedByteIndex, UnpaddedPieceSize,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::ManagerError;
use crate::local_worker::{LocalWorker, SealEngine};
use crate::proof::{
    PrivateSectorInfo, ProofEngine, SortedPrivateSectorInfo, WindowPoStResponse,
};
use crate::SealerConfig;

/// Default scheduling priority for pipeline stages.
const DEFAULT_PRIORITY: u64 = 0;

fn expect_unit(output: CallOutput) -> Result<(), ManagerError> {
    match output {
        CallOutput::Unit => Ok(()),
        other => Err(mismatch("unit", other)),
    }
}

fn expect_bool(output: CallOutput) -> Result<bool, ManagerError> {
    match output {
        CallOutput::Bool(value) => Ok(value),
        other => Err(mismatch("bool", other)),
    }
}

fn expect_piece(output: CallOutput) -> Result<PieceInfo, ManagerError> {
    match output {
        CallOutput::Piece(piece) => Ok(piece),
        other => Err(mismatch("piece", other)),
    }
}

fn expect_precommit1(output: CallOutput) -> Result<PreCommit1Output, ManagerError> {
    match output {
        CallOutput::PreCommit1(out) => Ok(out),
        other => Err(mismatch("precommit1", other)),
    }
}

fn expect_cids(output: CallOutput) -> Result<SectorCids, ManagerError> {
    match output {
        CallOutput::SectorCids(cids) => Ok(cids),
        other => Err(mismatch("sector-cids", other)),
    }
}

fn expect_commit1(output: CallOutput) -> Result<Commit1Output, ManagerError> {
    match output {
        CallOutput::Commit1(out) => Ok(out),
        other => Err(mismatch("commit1", other)),
    }
}

fn expect_proof(output: CallOutput) -> Result<Proof, ManagerError> {
    match output {
        CallOutput::Proof(proof) => Ok(proof),
        other => Err(mismatch("proof", other)),
    }
}

fn expect_vanilla(output: CallOutput) -> Result<Vec<Vec<u8>>, ManagerError> {
    match output {
        CallOutput::VanillaProofs(proofs) => Ok(proofs),
        other => Err(mismatch("vanilla-proofs", other)),
    }
}

fn mismatch(expected: &'static str, actual: CallOutput) -> ManagerError {
    ManagerError::VariantMismatch {
        expected,
        actual: actual.variant(),
    }
}

/// A fetch-into-place prepare action for the given file types.
fn fetch_prepare(sector: SectorRef, file_type: SectorFileType) -> WorkerAction {
    Arc::new(move |worker: Arc<dyn Worker>| {
        Box::pin(async move {
            worker
                .fetch(sector, file_type, PathType::Sealing, kiln_types::AcquireMode::Move)
                .await
        }) as ActionFuture
    })
}

/// Sequences every sealing-pipeline operation through lock acquisition,
/// worker selection, scheduling, and result decoding.
pub struct SectorManager {
    index: Arc<dyn SectorIndex>,
    local: Arc<LocalStore>,
    remote: Arc<RemoteStore>,
    scheduler: Arc<Scheduler>,
    proofs: Arc<dyn ProofEngine>,
}

impl SectorManager {
    /// Create a manager over the given stores and scheduler, registering
    /// a [`LocalWorker`] for the stages the config allows.
    pub async fn new(
        remote: Arc<RemoteStore>,
        scheduler: Arc<Scheduler>,
        seal_engine: Arc<dyn SealEngine>,
        proofs: Arc<dyn ProofEngine>,
        config: SealerConfig,
    ) -> Result<Arc<Self>, ManagerError> {
        let manager = Arc::new(Self {
            index: remote.sector_index().clone(),
            local: remote.local().clone(),
            remote: remote.clone(),
            scheduler: scheduler.clone(),
            proofs,
        });

        let worker = LocalWorker::new(
            remote,
            seal_engine,
            scheduler.clone() as Arc<dyn WorkerReturn>,
            config.task_types(),
        );
        scheduler.add_worker(worker).await?;
        Ok(manager)
    }

    /// Register an additional worker.
    pub async fn add_worker(&self, worker: Arc<dyn Worker>) -> Result<(), ManagerError> {
        self.scheduler.add_worker(worker).await?;
        Ok(())
    }

    /// Open another storage path on this node.
    pub async fn add_local_storage(&self, path: &Path) -> Result<(), ManagerError> {
        self.local.open_path(path).await?;
        Ok(())
    }

    /// Locally accessible storage locations.
    pub async fn local_storages(&self) -> Result<HashMap<StorageId, PathBuf>, ManagerError> {
        let paths = self.local.accessible_paths().await?;
        Ok(paths.into_iter().map(|p| (p.id, p.local_path)).collect())
    }

    /// Usage snapshot for a storage location, local or remote.
    pub async fn fs_stat(&self, id: &StorageId) -> Result<FsStat, ManagerError> {
        Ok(self.remote.get_fs_stat(id).await?)
    }

    /// Schedule one stage and decode nothing yet: run the selector-driven
    /// dispatch and await the call result.
    async fn run(
        &self,
        sector: SectorRef,
        task: TaskType,
        selector: Arc<dyn WorkerSelector>,
        prepare: Option<WorkerAction>,
        work: WorkerAction,
        work_id: Option<WorkId>,
    ) -> Result<CallOutput, ManagerError> {
        let (tx, rx) = oneshot::channel();
        let callback: ReturnCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        self.scheduler
            .schedule(
                sector,
                task,
                selector,
                prepare,
                work,
                callback,
                DEFAULT_PRIORITY,
                work_id,
            )
            .await?;
        match rx.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ManagerError::Call(e)),
            Err(_) => Err(ManagerError::Call(CallError::new(
                "scheduler dropped the request",
            ))),
        }
    }

    /// Write a piece into the sector's unsealed file.
    pub async fn add_piece(
        &self,
        sector: SectorRef,
        existing_sizes: Vec<UnpaddedPieceSize>,
        size: UnpaddedPieceSize,
        data: Bytes,
    ) -> Result<PieceInfo, ManagerError> {
        let _lock = self
            .index
            .storage_lock(sector.id, SectorFileType::NONE, SectorFileType::UNSEALED)
            .await?;

        let selector = Arc::new(AllocateSelector::new(
            self.index.clone(),
            SectorFileType::UNSEALED,
            PathType::Sealing,
        ));
        let work_id = WorkId::of(
            TaskType::AddPiece,
            &(sector, &existing_sizes, size, Commitment::from_data(&data)),
        )?;
        let work: WorkerAction = {
            let existing_sizes = existing_sizes.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let existing_sizes = existing_sizes.clone();
                let data = data.clone();
                Box::pin(async move { worker.add_piece(sector, existing_sizes, size, data).await })
                    as ActionFuture
            })
        };

        let output = self
            .run(sector, TaskType::AddPiece, selector, None, work, Some(work_id))
            .await?;
        expect_piece(output)
    }

    /// First pre-commit phase.
    pub async fn seal_pre_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        pieces: Vec<PieceInfo>,
    ) -> Result<PreCommit1Output, ManagerError> {
        let _lock = self
            .index
            .storage_lock(
                sector.id,
                SectorFileType::UNSEALED,
                SectorFileType::SEALED | SectorFileType::CACHE,
            )
            .await?;

        let selector = Arc::new(AllocateSelector::new(
            self.index.clone(),
            SectorFileType::SEALED | SectorFileType::CACHE,
            PathType::Sealing,
        ));
        let work_id = WorkId::of(TaskType::PreCommit1, &(sector, ticket, &pieces))?;
        let prepare = fetch_prepare(sector, SectorFileType::UNSEALED);
        let work: WorkerAction = {
            let pieces = pieces.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let pieces = pieces.clone();
                Box::pin(async move { worker.seal_pre_commit1(sector, ticket, pieces).await })
                    as ActionFuture
            })
        };

        let output = self
            .run(
                sector,
                TaskType::PreCommit1,
                selector,
                Some(prepare),
                work,
                Some(work_id),
            )
            .await?;
        expect_precommit1(output)
    }

    /// Second pre-commit phase.
    pub async fn seal_pre_commit2(
        &self,
        sector: SectorRef,
        phase1_output: PreCommit1Output,
    ) -> Result<SectorCids, ManagerError> {
        let _lock = self
            .index
            .storage_lock(sector.id, SectorFileType::SEALED, SectorFileType::CACHE)
            .await?;

        let selector = Arc::new(ExistingSelector::new(
            self.index.clone(),
            sector.id,
            SectorFileType::SEALED | SectorFileType::CACHE,
            true,
        ));
        let work_id = WorkId::of(TaskType::PreCommit2, &(sector, &phase1_output))?;
        let prepare = fetch_prepare(sector, SectorFileType::SEALED | SectorFileType::CACHE);
        let work: WorkerAction = {
            let phase1_output = phase1_output.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let phase1_output = phase1_output.clone();
                Box::pin(async move { worker.seal_pre_commit2(sector, phase1_output).await })
                    as ActionFuture
            })
        };

        let output = self
            .run(
                sector,
                TaskType::PreCommit2,
                selector,
                Some(prepare),
                work,
                Some(work_id),
            )
            .await?;
        expect_cids(output)
    }

    /// First commit phase.
    pub async fn seal_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        seed: InteractiveRandomness,
        pieces: Vec<PieceInfo>,
        cids: SectorCids,
    ) -> Result<Commit1Output, ManagerError> {
        let _lock = self
            .index
            .storage_lock(sector.id, SectorFileType::SEALED, SectorFileType::CACHE)
            .await?;

        // Commit1 is cheap and IO-local: run it where the files are, no
        // fetching.
        let selector = Arc::new(ExistingSelector::new(
            self.index.clone(),
            sector.id,
            SectorFileType::SEALED | SectorFileType::CACHE,
            false,
        ));
        let work_id = WorkId::of(TaskType::Commit1, &(sector, ticket, seed, &pieces, cids))?;
        let work: WorkerAction = {
            let pieces = pieces.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let pieces = pieces.clone();
                Box::pin(
                    async move { worker.seal_commit1(sector, ticket, seed, pieces, cids).await },
                ) as ActionFuture
            })
        };

        let output = self
            .run(sector, TaskType::Commit1, selector, None, work, Some(work_id))
            .await?;
        expect_commit1(output)
    }

    /// Second commit phase.
    pub async fn seal_commit2(
        &self,
        sector: SectorRef,
        phase1_output: Commit1Output,
    ) -> Result<Proof, ManagerError> {
        let selector = Arc::new(TaskSelector::new());
        let work_id = WorkId::of(TaskType::Commit2, &(sector, &phase1_output))?;
        let work: WorkerAction = {
            let phase1_output = phase1_output.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let phase1_output = phase1_output.clone();
                Box::pin(async move { worker.seal_commit2(sector, phase1_output).await })
                    as ActionFuture
            })
        };

        let output = self
            .run(sector, TaskType::Commit2, selector, None, work, Some(work_id))
            .await?;
        expect_proof(output)
    }

    /// Prune seal scratch and migrate artifacts to long-term storage.
    pub async fn finalize_sector(
        &self,
        sector: SectorRef,
        keep_unsealed: Vec<Range>,
    ) -> Result<(), ManagerError> {
        let _lock = self
            .index
            .storage_lock(
                sector.id,
                SectorFileType::NONE,
                SectorFileType::SEALED | SectorFileType::UNSEALED | SectorFileType::CACHE,
            )
            .await?;

        // Whether an unsealed copy will remain after finalization.
        let unsealed = if keep_unsealed.is_empty() {
            SectorFileType::NONE
        } else {
            let holders = self
                .index
                .storage_find_sector(sector.id, SectorFileType::UNSEALED, None)
                .await?;
            if holders.is_empty() {
                SectorFileType::NONE
            } else {
                SectorFileType::UNSEALED
            }
        };

        let selector = Arc::new(ExistingSelector::new(
            self.index.clone(),
            sector.id,
            SectorFileType::SEALED | SectorFileType::CACHE,
            false,
        ));
        let work_id = WorkId::of(TaskType::Finalize, &(sector, &keep_unsealed))?;
        let work: WorkerAction = {
            let keep_unsealed = keep_unsealed.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let keep_unsealed = keep_unsealed.clone();
                Box::pin(async move { worker.finalize_sector(sector, keep_unsealed).await })
                    as ActionFuture
            })
        };
        let output = self
            .run(sector, TaskType::Finalize, selector, None, work, Some(work_id))
            .await?;
        expect_unit(output)?;

        // Re-home the finalized artifacts on a long-term path.
        let move_types = (SectorFileType::SEALED | SectorFileType::CACHE).union(unsealed);
        let selector = Arc::new(AllocateSelector::new(
            self.index.clone(),
            move_types,
            PathType::Storage,
        ));
        let work_id = WorkId::of(TaskType::Fetch, &(sector, move_types))?;
        let work: WorkerAction = Arc::new(move |worker: Arc<dyn Worker>| {
            Box::pin(async move { worker.move_storage(sector, move_types).await }) as ActionFuture
        });
        let output = self
            .run(sector, TaskType::Fetch, selector, None, work, Some(work_id))
            .await?;
        expect_unit(output)?;

        info!(sector = %sector.id, "sector finalized and moved to storage");
        Ok(())
    }

    /// Produce an updated replica from new pieces (snap deal).
    pub async fn replica_update(
        &self,
        sector: SectorRef,
        pieces: Vec<PieceInfo>,
    ) -> Result<SectorCids, ManagerError> {
        let _lock = self
            .index
            .storage_lock(
                sector.id,
                SectorFileType::UNSEALED | SectorFileType::SEALED | SectorFileType::CACHE,
                SectorFileType::UPDATE | SectorFileType::UPDATE_CACHE,
            )
            .await?;

        let selector = Arc::new(AllocateSelector::new(
            self.index.clone(),
            SectorFileType::UPDATE | SectorFileType::UPDATE_CACHE,
            PathType::Sealing,
        ));
        let work_id = WorkId::of(TaskType::ReplicaUpdate, &(sector, &pieces))?;
        let prepare = fetch_prepare(
            sector,
            SectorFileType::UNSEALED | SectorFileType::SEALED | SectorFileType::CACHE,
        );
        let work: WorkerAction = {
            let pieces = pieces.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let pieces = pieces.clone();
                Box::pin(async move { worker.replica_update(sector, pieces).await }) as ActionFuture
            })
        };

        let output = self
            .run(
                sector,
                TaskType::ReplicaUpdate,
                selector,
                Some(prepare),
                work,
                Some(work_id),
            )
            .await?;
        expect_cids(output)
    }

    /// First phase of the replica-update proof.
    pub async fn prove_replica_update1(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
    ) -> Result<Vec<Vec<u8>>, ManagerError> {
        let read_mask = SectorFileType::SEALED
            | SectorFileType::CACHE
            | SectorFileType::UPDATE
            | SectorFileType::UPDATE_CACHE;
        let _lock = self
            .index
            .storage_lock(sector.id, read_mask, SectorFileType::NONE)
            .await?;

        let selector = Arc::new(ExistingSelector::new(
            self.index.clone(),
            sector.id,
            read_mask,
            false,
        ));
        let work_id = WorkId::of(
            TaskType::ProveReplicaUpdate1,
            &(sector, sector_key, new_sealed, new_unsealed),
        )?;
        let work: WorkerAction = Arc::new(move |worker: Arc<dyn Worker>| {
            Box::pin(async move {
                worker
                    .prove_replica_update1(sector, sector_key, new_sealed, new_unsealed)
                    .await
            }) as ActionFuture
        });

        let output = self
            .run(
                sector,
                TaskType::ProveReplicaUpdate1,
                selector,
                None,
                work,
                Some(work_id),
            )
            .await?;
        expect_vanilla(output)
    }

    /// Second phase of the replica-update proof.
    pub async fn prove_replica_update2(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
        vanilla_proofs: Vec<Vec<u8>>,
    ) -> Result<Proof, ManagerError> {
        let selector = Arc::new(TaskSelector::new());
        let work_id = WorkId::of(
            TaskType::ProveReplicaUpdate2,
            &(sector, sector_key, new_sealed, new_unsealed, &vanilla_proofs),
        )?;
        let work: WorkerAction = {
            let vanilla_proofs = vanilla_proofs.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let vanilla_proofs = vanilla_proofs.clone();
                Box::pin(async move {
                    worker
                        .prove_replica_update2(
                            sector,
                            sector_key,
                            new_sealed,
                            new_unsealed,
                            vanilla_proofs,
                        )
                        .await
                }) as ActionFuture
            })
        };

        let output = self
            .run(
                sector,
                TaskType::ProveReplicaUpdate2,
                selector,
                None,
                work,
                Some(work_id),
            )
            .await?;
        expect_proof(output)
    }

    /// Unseal (if needed) and read a payload range into `output`.
    /// Returns whether the range was present.
    pub async fn read_piece(
        &self,
        output: PathBuf,
        sector: SectorRef,
        offset: UnpaddedByteIndex,
        size: UnpaddedPieceSize,
        ticket: SealRandomness,
        unsealed_cid: Commitment,
    ) -> Result<bool, ManagerError> {
        let _lock = self
            .index
            .storage_lock(
                sector.id,
                SectorFileType::SEALED | SectorFileType::CACHE,
                SectorFileType::UNSEALED,
            )
            .await?;

        // Unseal the range where the sealed files are (fetchable).
        let selector = Arc::new(ExistingSelector::new(
            self.index.clone(),
            sector.id,
            SectorFileType::SEALED | SectorFileType::CACHE,
            true,
        ));
        let work_id = WorkId::of(TaskType::Unseal, &(sector, offset, size, ticket, unsealed_cid))?;
        let prepare = fetch_prepare(sector, SectorFileType::SEALED | SectorFileType::CACHE);
        let work: WorkerAction = Arc::new(move |worker: Arc<dyn Worker>| {
            Box::pin(async move {
                worker
                    .unseal_piece(sector, offset, size, ticket, unsealed_cid)
                    .await
            }) as ActionFuture
        });
        let unsealed = self
            .run(
                sector,
                TaskType::Unseal,
                selector,
                Some(prepare),
                work,
                Some(work_id),
            )
            .await?;
        expect_unit(unsealed)?;

        // Read where the unsealed file now lives; never fetch for a read.
        let selector = Arc::new(ExistingSelector::new(
            self.index.clone(),
            sector.id,
            SectorFileType::UNSEALED,
            false,
        ));
        let work_id = WorkId::of(TaskType::ReadUnsealed, &(sector, offset, size, &output))?;
        let work: WorkerAction = {
            let output = output.clone();
            Arc::new(move |worker: Arc<dyn Worker>| {
                let output = output.clone();
                Box::pin(async move { worker.read_piece(output, sector, offset, size).await })
                    as ActionFuture
            })
        };
        let read = self
            .run(
                sector,
                TaskType::ReadUnsealed,
                selector,
                None,
                work,
                Some(work_id),
            )
            .await?;
        expect_bool(read)
    }

    /// Delete every artifact of the sector, everywhere.
    pub async fn remove(&self, sector: SectorId) -> Result<(), ManagerError> {
        let all = SectorFileType::ALL
            .into_iter()
            .fold(SectorFileType::NONE, SectorFileType::union);
        let _lock = self
            .index
            .storage_lock(sector, SectorFileType::NONE, all)
            .await?;

        for t in SectorFileType::ALL {
            self.remote.remove(sector, t).await?;
        }
        info!(%sector, "sector removed");
        Ok(())
    }

    /// Validate that the given sectors are provable right now. A sector
    /// failing any check lands in the returned bad-sector list; one bad
    /// sector never aborts checking the rest.
    pub async fn check_provable(
        &self,
        proof_type: RegisteredSealProof,
        sectors: &[SectorId],
    ) -> Vec<SectorId> {
        let sector_size = proof_type.sector_size();
        let mut bad = Vec::new();

        for &id in sectors {
            // Never stall the caller on a busy sector.
            let Some(_lock) = self.index.storage_try_lock(
                id,
                SectorFileType::SEALED | SectorFileType::CACHE,
                SectorFileType::NONE,
            ) else {
                warn!(sector = %id, "checkProvable: sector is locked");
                bad.push(id);
                continue;
            };

            let sector = SectorRef { id, proof_type };
            let response = match self
                .local
                .acquire_sector(
                    sector,
                    SectorFileType::SEALED | SectorFileType::CACHE,
                    SectorFileType::NONE,
                    PathType::Storage,
                    kiln_types::AcquireMode::Move,
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(sector = %id, error = %e, "checkProvable: acquire failed");
                    bad.push(id);
                    continue;
                }
            };

            let (Some(sealed), Some(cache)) = (
                response.paths.get(SectorFileType::SEALED),
                response.paths.get(SectorFileType::CACHE),
            ) else {
                warn!(sector = %id, "checkProvable: no declared files");
                bad.push(id);
                continue;
            };

            match tokio::fs::metadata(sealed).await {
                Ok(meta) if meta.len() == sector_size => {}
                Ok(meta) => {
                    warn!(sector = %id, size = meta.len(), expected = sector_size,
                          "checkProvable: sealed file has wrong size");
                    bad.push(id);
                    continue;
                }
                Err(e) => {
                    warn!(sector = %id, error = %e, "checkProvable: sealed file unreachable");
                    bad.push(id);
                    continue;
                }
            }

            if tokio::fs::metadata(cache).await.is_err() {
                warn!(sector = %id, "checkProvable: cache dir unreachable");
                bad.push(id);
            }
        }

        bad
    }

    /// Gather private sector info for PoSt generation, skipping sectors
    /// that cannot be non-blocking-locked or locally acquired.
    async fn public_sectors_to_private(
        &self,
        miner: ActorId,
        sector_info: &[SectorInfo],
        faults: &[SectorNumber],
        winning: bool,
    ) -> Result<(SortedPrivateSectorInfo, Vec<SectorId>), ManagerError> {
        let faults: HashSet<SectorNumber> = faults.iter().copied().collect();
        let mut private = Vec::new();
        let mut skipped = Vec::new();

        for info in sector_info {
            if faults.contains(&info.sector) {
                continue;
            }
            let id = SectorId::new(miner, info.sector);

            let Some(_lock) = self.index.storage_try_lock(
                id,
                SectorFileType::SEALED | SectorFileType::CACHE,
                SectorFileType::NONE,
            ) else {
                debug!(sector = %id, "post: sector locked, skipping");
                skipped.push(id);
                continue;
            };

            let sector = SectorRef {
                id,
                proof_type: info.seal_proof,
            };
            let response = match self
                .local
                .acquire_sector(
                    sector,
                    SectorFileType::SEALED | SectorFileType::CACHE,
                    SectorFileType::NONE,
                    PathType::Storage,
                    kiln_types::AcquireMode::Move,
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    debug!(sector = %id, error = %e, "post: acquire failed, skipping");
                    skipped.push(id);
                    continue;
                }
            };

            let (Some(sealed), Some(cache)) = (
                response.paths.get(SectorFileType::SEALED),
                response.paths.get(SectorFileType::CACHE),
            ) else {
                debug!(sector = %id, "post: files not present, skipping");
                skipped.push(id);
                continue;
            };

            let post_proof_type = if winning {
                info.seal_proof.registered_winning_post_proof()
            } else {
                info.seal_proof.registered_window_post_proof()
            };
            private.push(PrivateSectorInfo {
                info: *info,
                cache_dir_path: cache.clone(),
                post_proof_type,
                sealed_sector_path: sealed.clone(),
            });
        }

        Ok((SortedPrivateSectorInfo::new(private), skipped))
    }

    /// Generate a winning PoSt. Any unprovable sector is fatal: winning
    /// post must cover the exact eligible set.
    pub async fn generate_winning_post(
        &self,
        miner: ActorId,
        sector_info: &[SectorInfo],
        mut randomness: PoStRandomness,
    ) -> Result<Vec<PoStProof>, ManagerError> {
        randomness[31] = 0;
        let (private, skipped) = self
            .public_sectors_to_private(miner, sector_info, &[], true)
            .await?;
        if !skipped.is_empty() {
            return Err(ManagerError::SomeSectorsSkipped(skipped));
        }
        self.proofs
            .generate_winning_post(miner, &private, randomness)
            .await
    }

    /// Generate a window PoSt over the provable subset, reporting the
    /// sectors that had to be skipped.
    pub async fn generate_window_post(
        &self,
        miner: ActorId,
        sector_info: &[SectorInfo],
        mut randomness: PoStRandomness,
    ) -> Result<WindowPoStResponse, ManagerError> {
        randomness[31] = 0;
        let (private, skipped) = self
            .public_sectors_to_private(miner, sector_info, &[], false)
            .await?;
        if !skipped.is_empty() {
            warn!(count = skipped.len(), "window post: skipping unprovable sectors");
        }
        let proofs = self
            .proofs
            .generate_window_post(miner, &private, randomness)
            .await?;
        Ok(WindowPoStResponse { proofs, skipped })
    }
}
