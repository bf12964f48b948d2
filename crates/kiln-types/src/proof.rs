//! Seal and PoSt proof types.
//!
//! The seal/PoSt split typing is canonical: sealing stages are keyed by
//! [`RegisteredSealProof`], and the two PoSt variants are derived from it
//! per sector when proofs are generated.

use serde::{Deserialize, Serialize};

use crate::piece::Commitment;
use crate::sector::SectorNumber;

/// Sector size in bytes.
pub type SectorSize = u64;

/// Randomness drawn at seal ticket time.
pub type SealRandomness = [u8; 32];

/// Randomness drawn at the interactive (commit) challenge.
pub type InteractiveRandomness = [u8; 32];

/// Randomness for PoSt generation.
pub type PoStRandomness = [u8; 32];

/// Opaque output of the first pre-commit phase.
pub type PreCommit1Output = Vec<u8>;

/// Opaque output of the first commit phase.
pub type Commit1Output = Vec<u8>;

/// An opaque proof blob.
pub type Proof = Vec<u8>;

/// Registered seal proof types, one per supported sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisteredSealProof {
    /// 2 KiB sectors (test networks).
    StackedDrg2KiBV1_1,
    /// 8 MiB sectors (test networks).
    StackedDrg8MiBV1_1,
    /// 512 MiB sectors.
    StackedDrg512MiBV1_1,
    /// 32 GiB sectors (mainnet).
    StackedDrg32GiBV1_1,
    /// 64 GiB sectors (mainnet).
    StackedDrg64GiBV1_1,
}

impl RegisteredSealProof {
    /// The sector size this proof type seals.
    pub fn sector_size(self) -> SectorSize {
        match self {
            Self::StackedDrg2KiBV1_1 => 2 << 10,
            Self::StackedDrg8MiBV1_1 => 8 << 20,
            Self::StackedDrg512MiBV1_1 => 512 << 20,
            Self::StackedDrg32GiBV1_1 => 32 << 30,
            Self::StackedDrg64GiBV1_1 => 64 << 30,
        }
    }

    /// The winning-PoSt proof type for sectors sealed with this proof.
    pub fn registered_winning_post_proof(self) -> RegisteredPoStProof {
        match self {
            Self::StackedDrg2KiBV1_1 => RegisteredPoStProof::StackedDrgWinning2KiBV1,
            Self::StackedDrg8MiBV1_1 => RegisteredPoStProof::StackedDrgWinning8MiBV1,
            Self::StackedDrg512MiBV1_1 => RegisteredPoStProof::StackedDrgWinning512MiBV1,
            Self::StackedDrg32GiBV1_1 => RegisteredPoStProof::StackedDrgWinning32GiBV1,
            Self::StackedDrg64GiBV1_1 => RegisteredPoStProof::StackedDrgWinning64GiBV1,
        }
    }

    /// The window-PoSt proof type for sectors sealed with this proof.
    pub fn registered_window_post_proof(self) -> RegisteredPoStProof {
        match self {
            Self::StackedDrg2KiBV1_1 => RegisteredPoStProof::StackedDrgWindow2KiBV1,
            Self::StackedDrg8MiBV1_1 => RegisteredPoStProof::StackedDrgWindow8MiBV1,
            Self::StackedDrg512MiBV1_1 => RegisteredPoStProof::StackedDrgWindow512MiBV1,
            Self::StackedDrg32GiBV1_1 => RegisteredPoStProof::StackedDrgWindow32GiBV1,
            Self::StackedDrg64GiBV1_1 => RegisteredPoStProof::StackedDrgWindow64GiBV1,
        }
    }
}

/// Registered PoSt proof types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RegisteredPoStProof {
    StackedDrgWinning2KiBV1,
    StackedDrgWinning8MiBV1,
    StackedDrgWinning512MiBV1,
    StackedDrgWinning32GiBV1,
    StackedDrgWinning64GiBV1,
    StackedDrgWindow2KiBV1,
    StackedDrgWindow8MiBV1,
    StackedDrgWindow512MiBV1,
    StackedDrgWindow32GiBV1,
    StackedDrgWindow64GiBV1,
}

/// On-chain info about a committed sector, the input to PoSt generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorInfo {
    /// Seal proof type the sector was committed with.
    pub seal_proof: RegisteredSealProof,
    /// The sector number.
    pub sector: SectorNumber,
    /// Commitment to the sealed replica.
    pub sealed_cid: Commitment,
}

/// A generated proof-of-spacetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoStProof {
    /// Which PoSt circuit produced the proof.
    pub post_proof: RegisteredPoStProof,
    /// The proof bytes.
    pub proof: Proof,
}
