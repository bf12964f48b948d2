//! [`LocalWorker`] — stage execution on this node.
//!
//! Every stage call is accepted immediately with a fresh [`CallId`]; the
//! stage body runs on a spawned task and pushes its [`CallResult`]
//! through the scheduler's return channel. Storage motion goes through
//! the [`RemoteStore`]; proof computation is delegated to the
//! [`SealEngine`].

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_index::SectorIndex;
use kiln_sched::{Worker, WorkerReturn};
use kiln_store::{AcquireResponse, RemoteStore, Store};
use kiln_types::{
    AcquireMode, CallError, CallId, CallOutput, CallResult, Commit1Output, Commitment,
    InteractiveRandomness, PathType, PieceInfo, PreCommit1Output, Proof, Range, SealRandomness,
    SectorCids, SectorFileType, SectorId, SectorRef, StoragePath, TaskType, UnpaddedByteIndex,
    UnpaddedPieceSize, WorkerInfo, WorkerResources,
};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// The proof kernels, invoked with acquired artifact paths. The engine
/// writes the artifacts it produces (sealed replica, cache, update
/// replica) at the paths given; bookkeeping stays in the worker.
#[async_trait]
pub trait SealEngine: Send + Sync {
    /// First pre-commit phase: produce the replica and start the trees.
    async fn seal_pre_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        pieces: &[PieceInfo],
        paths: &AcquireResponse,
    ) -> Result<PreCommit1Output, CallError>;

    /// Second pre-commit phase: finish the trees, output commitments.
    async fn seal_pre_commit2(
        &self,
        sector: SectorRef,
        phase1_output: &PreCommit1Output,
        paths: &AcquireResponse,
    ) -> Result<SectorCids, CallError>;

    /// First commit phase: vanilla proofs.
    async fn seal_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        seed: InteractiveRandomness,
        pieces: &[PieceInfo],
        cids: &SectorCids,
        paths: &AcquireResponse,
    ) -> Result<Commit1Output, CallError>;

    /// Second commit phase: snark compression.
    async fn seal_commit2(
        &self,
        sector: SectorRef,
        phase1_output: &Commit1Output,
    ) -> Result<Proof, CallError>;

    /// Unseal a payload range into the unsealed file.
    async fn unseal(
        &self,
        sector: SectorRef,
        offset: UnpaddedByteIndex,
        size: UnpaddedPieceSize,
        randomness: SealRandomness,
        unsealed_cid: Commitment,
        paths: &AcquireResponse,
    ) -> Result<(), CallError>;

    /// Produce an updated replica from new pieces.
    async fn replica_update(
        &self,
        sector: SectorRef,
        pieces: &[PieceInfo],
        paths: &AcquireResponse,
    ) -> Result<SectorCids, CallError>;

    /// First phase of the replica-update proof.
    async fn prove_replica_update1(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
        paths: &AcquireResponse,
    ) -> Result<Vec<Vec<u8>>, CallError>;

    /// Second phase of the replica-update proof.
    async fn prove_replica_update2(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
        vanilla_proofs: &[Vec<u8>],
    ) -> Result<Proof, CallError>;
}

/// Cache files that survive finalization; everything else in the cache
/// dir is tree scratch.
const FINALIZED_CACHE_FILES: [&str; 2] = ["p_aux", "t_aux"];

fn call_err(e: impl std::fmt::Display) -> CallError {
    CallError::new(e.to_string())
}

/// Detect the host's resources for worker registration.
pub fn detect_resources() -> WorkerResources {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(1);
    let (physical_memory, swap_memory) = read_meminfo().unwrap_or((0, 0));
    WorkerResources {
        physical_memory,
        swap_memory,
        reserved_memory: 0,
        cpus,
        gpus: Vec::new(),
    }
}

#[cfg(target_os = "linux")]
fn read_meminfo() -> Option<(u64, u64)> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut total = None;
    let mut swap = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next()? {
            "MemTotal:" => total = parts.next()?.parse::<u64>().ok().map(|kb| kb * 1024),
            "SwapTotal:" => swap = parts.next()?.parse::<u64>().ok().map(|kb| kb * 1024),
            _ => continue,
        }
        if total.is_some() && swap.is_some() {
            break;
        }
    }
    Some((total?, swap.unwrap_or(0)))
}

#[cfg(not(target_os = "linux"))]
fn read_meminfo() -> Option<(u64, u64)> {
    None
}

/// Executes pipeline stages on this node.
pub struct LocalWorker {
    remote: Arc<RemoteStore>,
    index: Arc<dyn SectorIndex>,
    engine: Arc<dyn SealEngine>,
    ret: Arc<dyn WorkerReturn>,
    tasks: HashSet<TaskType>,
    info: WorkerInfo,
}

impl LocalWorker {
    /// Create a local worker advertising the given task set.
    pub fn new(
        remote: Arc<RemoteStore>,
        engine: Arc<dyn SealEngine>,
        ret: Arc<dyn WorkerReturn>,
        tasks: HashSet<TaskType>,
    ) -> Arc<Self> {
        let index = remote.sector_index().clone();
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Arc::new(Self {
            remote,
            index,
            engine,
            ret,
            tasks,
            info: WorkerInfo {
                hostname,
                resources: detect_resources(),
            },
        })
    }

    /// Accept a stage: mint a call id, run the body on a spawned task,
    /// and push the result through the return channel.
    fn async_call<F>(&self, sector: SectorId, task: &'static str, body: F) -> Result<CallId, CallError>
    where
        F: Future<Output = CallResult> + Send + 'static,
    {
        let call_id = CallId::new(sector);
        debug!(%call_id, task, "stage accepted");
        let ret = Arc::clone(&self.ret);
        tokio::spawn(async move {
            let result = body.await;
            if let Err(e) = &result {
                warn!(%call_id, task, error = %e, "stage failed");
            }
            ret.return_result(call_id, result);
        });
        Ok(call_id)
    }

    fn parts(&self) -> (Arc<RemoteStore>, Arc<dyn SectorIndex>, Arc<dyn SealEngine>) {
        (
            Arc::clone(&self.remote),
            Arc::clone(&self.index),
            Arc::clone(&self.engine),
        )
    }
}

/// Declare freshly produced artifacts as primary copies.
async fn declare_allocated(
    index: &Arc<dyn SectorIndex>,
    response: &AcquireResponse,
    sector: SectorId,
    allocated: SectorFileType,
) -> Result<(), CallError> {
    for t in allocated.iter() {
        let storage = response
            .storages
            .get(t)
            .ok_or_else(|| call_err(format!("no storage id for produced {t}")))?;
        index
            .storage_declare_sector(storage, sector, t, true)
            .await
            .map_err(call_err)?;
    }
    Ok(())
}

#[async_trait]
impl Worker for LocalWorker {
    async fn info(&self) -> Result<WorkerInfo, CallError> {
        Ok(self.info.clone())
    }

    async fn supported_tasks(&self) -> Result<HashSet<TaskType>, CallError> {
        Ok(self.tasks.clone())
    }

    async fn accessible_paths(&self) -> Result<Vec<StoragePath>, CallError> {
        self.remote.local().accessible_paths().await.map_err(call_err)
    }

    async fn add_piece(
        &self,
        sector: SectorRef,
        existing_sizes: Vec<UnpaddedPieceSize>,
        size: UnpaddedPieceSize,
        data: Bytes,
    ) -> Result<CallId, CallError> {
        let (remote, index, _) = self.parts();
        self.async_call(sector.id, "add-piece", async move {
            let first_piece = existing_sizes.is_empty();
            let (existing, allocate) = if first_piece {
                (SectorFileType::NONE, SectorFileType::UNSEALED)
            } else {
                (SectorFileType::UNSEALED, SectorFileType::NONE)
            };
            let response = remote
                .acquire_sector(sector, existing, allocate, PathType::Sealing, AcquireMode::Move)
                .await
                .map_err(call_err)?;
            let path = response
                .paths
                .get(SectorFileType::UNSEALED)
                .ok_or_else(|| call_err("no unsealed path acquired"))?;

            let _reservation = if first_piece {
                Some(
                    remote
                        .local()
                        .reserve(
                            sector,
                            SectorFileType::UNSEALED,
                            &response.storages,
                            PathType::Sealing,
                        )
                        .await
                        .map_err(call_err)?,
                )
            } else {
                None
            };

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(call_err)?;
            file.write_all(&data).await.map_err(call_err)?;
            file.flush().await.map_err(call_err)?;

            if first_piece {
                declare_allocated(&index, &response, sector.id, SectorFileType::UNSEALED).await?;
            }

            Ok(CallOutput::Piece(PieceInfo {
                size: size.padded(),
                cid: Commitment::from_data(&data),
            }))
        })
    }

    async fn seal_pre_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        pieces: Vec<PieceInfo>,
    ) -> Result<CallId, CallError> {
        let (remote, index, engine) = self.parts();
        self.async_call(sector.id, "pre-commit-1", async move {
            let allocate = SectorFileType::SEALED | SectorFileType::CACHE;
            let response = remote
                .acquire_sector(
                    sector,
                    SectorFileType::UNSEALED,
                    allocate,
                    PathType::Sealing,
                    AcquireMode::Move,
                )
                .await
                .map_err(call_err)?;
            let _reservation = remote
                .local()
                .reserve(sector, allocate, &response.storages, PathType::Sealing)
                .await
                .map_err(call_err)?;

            let output = engine
                .seal_pre_commit1(sector, ticket, &pieces, &response)
                .await?;

            declare_allocated(&index, &response, sector.id, allocate).await?;
            Ok(CallOutput::PreCommit1(output))
        })
    }

    async fn seal_pre_commit2(
        &self,
        sector: SectorRef,
        phase1_output: PreCommit1Output,
    ) -> Result<CallId, CallError> {
        let (remote, _, engine) = self.parts();
        self.async_call(sector.id, "pre-commit-2", async move {
            let response = remote
                .acquire_sector(
                    sector,
                    SectorFileType::SEALED | SectorFileType::CACHE,
                    SectorFileType::NONE,
                    PathType::Sealing,
                    AcquireMode::Move,
                )
                .await
                .map_err(call_err)?;
            let cids = engine
                .seal_pre_commit2(sector, &phase1_output, &response)
                .await?;
            Ok(CallOutput::SectorCids(cids))
        })
    }

    async fn seal_commit1(
        &self,
        sector: SectorRef,
        ticket: SealRandomness,
        seed: InteractiveRandomness,
        pieces: Vec<PieceInfo>,
        cids: SectorCids,
    ) -> Result<CallId, CallError> {
        let (remote, _, engine) = self.parts();
        self.async_call(sector.id, "commit-1", async move {
            let response = remote
                .acquire_sector(
                    sector,
                    SectorFileType::SEALED | SectorFileType::CACHE,
                    SectorFileType::NONE,
                    PathType::Sealing,
                    AcquireMode::Move,
                )
                .await
                .map_err(call_err)?;
            let output = engine
                .seal_commit1(sector, ticket, seed, &pieces, &cids, &response)
                .await?;
            Ok(CallOutput::Commit1(output))
        })
    }

    async fn seal_commit2(
        &self,
        sector: SectorRef,
        phase1_output: Commit1Output,
    ) -> Result<CallId, CallError> {
        let (_, _, engine) = self.parts();
        self.async_call(sector.id, "commit-2", async move {
            let proof = engine.seal_commit2(sector, &phase1_output).await?;
            Ok(CallOutput::Proof(proof))
        })
    }

    async fn finalize_sector(
        &self,
        sector: SectorRef,
        keep_unsealed: Vec<Range>,
    ) -> Result<CallId, CallError> {
        let (remote, _, _) = self.parts();
        self.async_call(sector.id, "finalize", async move {
            // The unsealed payload is only kept for live deal ranges.
            if keep_unsealed.is_empty() {
                remote
                    .remove(sector.id, SectorFileType::UNSEALED)
                    .await
                    .map_err(call_err)?;
            }

            let response = remote
                .acquire_sector(
                    sector,
                    SectorFileType::CACHE,
                    SectorFileType::NONE,
                    PathType::Sealing,
                    AcquireMode::Move,
                )
                .await
                .map_err(call_err)?;
            let cache = response
                .paths
                .get(SectorFileType::CACHE)
                .ok_or_else(|| call_err("no cache path acquired"))?;

            // Prune tree scratch, keeping only the aux commitments.
            let mut entries = tokio::fs::read_dir(cache).await.map_err(call_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(call_err)? {
                let name = entry.file_name();
                let keep = name
                    .to_str()
                    .is_some_and(|n| FINALIZED_CACHE_FILES.contains(&n));
                if keep {
                    continue;
                }
                let path = entry.path();
                let removed = if path.is_dir() {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                if let Err(e) = removed {
                    warn!(path = %path.display(), error = %e, "failed to prune cache entry");
                }
            }
            info!(sector = %sector.id, "sector finalized");
            Ok(CallOutput::Unit)
        })
    }

    async fn move_storage(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
    ) -> Result<CallId, CallError> {
        let (remote, _, _) = self.parts();
        self.async_call(sector.id, "move-storage", async move {
            remote
                .move_storage(sector, file_type)
                .await
                .map_err(call_err)?;
            Ok(CallOutput::Unit)
        })
    }

    async fn fetch(
        &self,
        sector: SectorRef,
        file_type: SectorFileType,
        path_type: PathType,
        mode: AcquireMode,
    ) -> Result<CallId, CallError> {
        let (remote, _, _) = self.parts();
        self.async_call(sector.id, "fetch", async move {
            remote
                .acquire_sector(sector, file_type, SectorFileType::NONE, path_type, mode)
                .await
                .map_err(call_err)?;
            Ok(CallOutput::Unit)
        })
    }

    async fn unseal_piece(
        &self,
        sector: SectorRef,
        offset: UnpaddedByteIndex,
        size: UnpaddedPieceSize,
        randomness: SealRandomness,
        unsealed_cid: Commitment,
    ) -> Result<CallId, CallError> {
        let (remote, index, engine) = self.parts();
        self.async_call(sector.id, "unseal", async move {
            let have_unsealed = !index
                .storage_find_sector(sector.id, SectorFileType::UNSEALED, None)
                .await
                .map_err(call_err)?
                .is_empty();

            let (existing, allocate) = if have_unsealed {
                (
                    SectorFileType::UNSEALED | SectorFileType::SEALED | SectorFileType::CACHE,
                    SectorFileType::NONE,
                )
            } else {
                (
                    SectorFileType::SEALED | SectorFileType::CACHE,
                    SectorFileType::UNSEALED,
                )
            };
            let response = remote
                .acquire_sector(sector, existing, allocate, PathType::Sealing, AcquireMode::Move)
                .await
                .map_err(call_err)?;

            engine
                .unseal(sector, offset, size, randomness, unsealed_cid, &response)
                .await?;

            if !have_unsealed {
                declare_allocated(&index, &response, sector.id, SectorFileType::UNSEALED).await?;
            }
            Ok(CallOutput::Unit)
        })
    }

    async fn read_piece(
        &self,
        output: PathBuf,
        sector: SectorRef,
        offset: UnpaddedByteIndex,
        size: UnpaddedPieceSize,
    ) -> Result<CallId, CallError> {
        let (remote, _, _) = self.parts();
        self.async_call(sector.id, "read-piece", async move {
            let response = remote
                .local()
                .acquire_sector(
                    sector,
                    SectorFileType::UNSEALED,
                    SectorFileType::NONE,
                    PathType::Sealing,
                    AcquireMode::Move,
                )
                .await
                .map_err(call_err)?;
            let Some(path) = response.paths.get(SectorFileType::UNSEALED) else {
                return Ok(CallOutput::Bool(false));
            };

            let mut file = match tokio::fs::File::open(path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(CallOutput::Bool(false));
                }
                Err(e) => return Err(call_err(e)),
            };
            file.seek(std::io::SeekFrom::Start(offset))
                .await
                .map_err(call_err)?;
            let mut buffer = vec![0u8; size.0 as usize];
            if let Err(e) = file.read_exact(&mut buffer).await {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Ok(CallOutput::Bool(false));
                }
                return Err(call_err(e));
            }

            tokio::fs::write(&output, &buffer).await.map_err(call_err)?;
            Ok(CallOutput::Bool(true))
        })
    }

    async fn replica_update(
        &self,
        sector: SectorRef,
        pieces: Vec<PieceInfo>,
    ) -> Result<CallId, CallError> {
        let (remote, index, engine) = self.parts();
        self.async_call(sector.id, "replica-update", async move {
            let existing =
                SectorFileType::UNSEALED | SectorFileType::SEALED | SectorFileType::CACHE;
            let allocate = SectorFileType::UPDATE | SectorFileType::UPDATE_CACHE;
            let response = remote
                .acquire_sector(sector, existing, allocate, PathType::Sealing, AcquireMode::Move)
                .await
                .map_err(call_err)?;
            let _reservation = remote
                .local()
                .reserve(sector, allocate, &response.storages, PathType::Sealing)
                .await
                .map_err(call_err)?;

            let cids = engine.replica_update(sector, &pieces, &response).await?;

            declare_allocated(&index, &response, sector.id, allocate).await?;
            Ok(CallOutput::SectorCids(cids))
        })
    }

    async fn prove_replica_update1(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
    ) -> Result<CallId, CallError> {
        let (remote, _, engine) = self.parts();
        self.async_call(sector.id, "prove-replica-update-1", async move {
            let existing = SectorFileType::SEALED
                | SectorFileType::CACHE
                | SectorFileType::UPDATE
                | SectorFileType::UPDATE_CACHE;
            let response = remote
                .acquire_sector(
                    sector,
                    existing,
                    SectorFileType::NONE,
                    PathType::Sealing,
                    AcquireMode::Move,
                )
                .await
                .map_err(call_err)?;
            let proofs = engine
                .prove_replica_update1(sector, sector_key, new_sealed, new_unsealed, &response)
                .await?;
            Ok(CallOutput::VanillaProofs(proofs))
        })
    }

    async fn prove_replica_update2(
        &self,
        sector: SectorRef,
        sector_key: Commitment,
        new_sealed: Commitment,
        new_unsealed: Commitment,
        vanilla_proofs: Vec<Vec<u8>>,
    ) -> Result<CallId, CallError> {
        let (_, _, engine) = self.parts();
        self.async_call(sector.id, "prove-replica-update-2", async move {
            let proof = engine
                .prove_replica_update2(sector, sector_key, new_sealed, new_unsealed, &vanilla_proofs)
                .await?;
            Ok(CallOutput::Proof(proof))
        })
    }

    async fn remove(&self, sector: SectorId) -> Result<CallId, CallError> {
        let (remote, _, _) = self.parts();
        self.async_call(sector, "remove", async move {
            for t in SectorFileType::ALL {
                remote.remove(sector, t).await.map_err(call_err)?;
            }
            Ok(CallOutput::Unit)
        })
    }
}
