//! Sector identity and naming.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::proof::RegisteredSealProof;

/// Actor (miner) identifier on chain.
pub type ActorId = u64;

/// Sector number, unique per miner.
pub type SectorNumber = u64;

/// Globally unique sector identity: `(miner actor id, sector number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorId {
    /// The miner actor that committed this sector.
    pub miner: ActorId,
    /// The sector number within that miner's sector space.
    pub number: SectorNumber,
}

impl SectorId {
    /// Create a sector id.
    pub fn new(miner: ActorId, number: SectorNumber) -> Self {
        Self { miner, number }
    }
}

/// Sector file names are derived deterministically from the id:
/// `s-t0{miner}-{number}`.
impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

impl FromStr for SectorId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("s-t0")
            .ok_or_else(|| TypesError::InvalidSectorName(s.to_string()))?;
        let (miner, number) = rest
            .split_once('-')
            .ok_or_else(|| TypesError::InvalidSectorName(s.to_string()))?;
        let miner = miner
            .parse()
            .map_err(|_| TypesError::InvalidSectorName(s.to_string()))?;
        let number = number
            .parse()
            .map_err(|_| TypesError::InvalidSectorName(s.to_string()))?;
        Ok(Self { miner, number })
    }
}

/// A sector together with the seal proof type it is (being) sealed with.
///
/// The proof type determines the sector size, which drives space
/// reservations and allocation scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRef {
    /// The sector identity.
    pub id: SectorId,
    /// Seal proof type this sector uses.
    pub proof_type: RegisteredSealProof,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_name_format() {
        let id = SectorId::new(1000, 42);
        assert_eq!(id.to_string(), "s-t01000-42");
    }

    #[test]
    fn test_sector_name_roundtrip() {
        let id = SectorId::new(42, 7);
        let parsed: SectorId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_sector_name_rejects_garbage() {
        assert!("not-a-sector".parse::<SectorId>().is_err());
        assert!("s-t0".parse::<SectorId>().is_err());
        assert!("s-t0abc-1".parse::<SectorId>().is_err());
        assert!("s-t01-".parse::<SectorId>().is_err());
    }
}
