//! Shared types and identifiers for Kiln.
//!
//! This crate defines all core types used across the Kiln workspace:
//! sector identity ([`SectorId`], [`SectorRef`]), the sector-file bit-flag
//! algebra ([`SectorFileType`], [`FileTypeMap`]), proof types
//! ([`RegisteredSealProof`], [`RegisteredPoStProof`]), storage descriptors
//! ([`StorageInfo`], [`FsStat`], [`LocalStorageMeta`]), piece-size
//! arithmetic, pipeline task types, and the async worker call payloads
//! ([`CallId`], [`CallResult`]).

mod call;
mod error;
mod file_type;
mod piece;
mod proof;
mod sector;
mod storage;
mod task;
mod worker;

pub use call::{CallError, CallId, CallOutput, CallResult, SectorCids};
pub use error::TypesError;
pub use file_type::{
    FileTypeMap, SectorFileType, seal_space_use, space_use, OVERHEAD_DENOMINATOR,
};
pub use piece::{
    Commitment, PaddedPieceSize, PieceInfo, Range, UnpaddedByteIndex, UnpaddedPieceSize,
};
pub use proof::{
    Commit1Output, InteractiveRandomness, PoStProof, PoStRandomness, PreCommit1Output, Proof,
    RegisteredPoStProof, RegisteredSealProof, SealRandomness, SectorInfo, SectorSize,
};
pub use sector::{ActorId, SectorId, SectorNumber, SectorRef};
pub use storage::{
    AcquireMode, FsStat, HealthReport, LocalStorageMeta, PathType, StorageId, StorageInfo,
    StoragePath, METADATA_FILE,
};
pub use task::TaskType;
pub use worker::{WorkerInfo, WorkerResources};
