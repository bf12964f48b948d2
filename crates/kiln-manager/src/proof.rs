//! The PoSt proof-engine seam.

use std::path::PathBuf;

use async_trait::async_trait;
use kiln_types::{ActorId, PoStProof, PoStRandomness, RegisteredPoStProof, SectorId, SectorInfo};

use crate::error::ManagerError;

/// Everything the prover needs for one sector: its on-chain info plus the
/// locally acquired artifact paths.
#[derive(Debug, Clone)]
pub struct PrivateSectorInfo {
    /// On-chain sector info.
    pub info: SectorInfo,
    /// Local path of the seal cache directory.
    pub cache_dir_path: PathBuf,
    /// The PoSt circuit to prove this sector with.
    pub post_proof_type: RegisteredPoStProof,
    /// Local path of the sealed replica.
    pub sealed_sector_path: PathBuf,
}

/// Private sector infos in canonical (sector-number) order, as the
/// prover expects them.
#[derive(Debug, Clone, Default)]
pub struct SortedPrivateSectorInfo {
    values: Vec<PrivateSectorInfo>,
}

impl SortedPrivateSectorInfo {
    /// Sort the given infos into canonical order.
    pub fn new(mut values: Vec<PrivateSectorInfo>) -> Self {
        values.sort_by_key(|v| v.info.sector);
        Self { values }
    }

    /// The sorted infos.
    pub fn values(&self) -> &[PrivateSectorInfo] {
        &self.values
    }

    /// Whether there is anything to prove.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The opaque proving engine consumed by PoSt generation.
#[async_trait]
pub trait ProofEngine: Send + Sync {
    /// Generate a winning PoSt over the exact eligible set.
    async fn generate_winning_post(
        &self,
        miner: ActorId,
        sectors: &SortedPrivateSectorInfo,
        randomness: PoStRandomness,
    ) -> Result<Vec<PoStProof>, ManagerError>;

    /// Generate a window PoSt over the provable subset.
    async fn generate_window_post(
        &self,
        miner: ActorId,
        sectors: &SortedPrivateSectorInfo,
        randomness: PoStRandomness,
    ) -> Result<Vec<PoStProof>, ManagerError>;
}

/// Result of window-PoSt generation: the proofs plus the sectors that
/// could not be proven.
#[derive(Debug, Clone)]
pub struct WindowPoStResponse {
    /// Proofs over the provable subset.
    pub proofs: Vec<PoStProof>,
    /// Sectors skipped because they could not be locked or acquired.
    pub skipped: Vec<SectorId>,
}
