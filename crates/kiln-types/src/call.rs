//! Asynchronous worker call correlation and result payloads.
//!
//! A worker accepts a stage call and immediately returns a [`CallId`];
//! the eventual outcome arrives out-of-band as a [`CallResult`] delivered
//! exactly once per id.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::piece::PieceInfo;
use crate::piece::Commitment;
use crate::proof::{Commit1Output, PreCommit1Output, Proof};
use crate::sector::SectorId;

/// Correlates an asynchronous worker invocation with its eventual result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    /// The sector the call operates on.
    pub sector: SectorId,
    /// Unique id minted when the call was accepted.
    pub id: Uuid,
}

impl CallId {
    /// Mint a fresh call id for a sector.
    pub fn new(sector: SectorId) -> Self {
        Self {
            sector,
            id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.sector, self.id)
    }
}

/// An error reported by a worker for a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("worker call failed: {message}")]
pub struct CallError {
    /// Human-readable failure description.
    pub message: String,
}

impl CallError {
    /// Wrap a message into a call error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Commitments produced by the second pre-commit phase (and by replica
/// updates, which output the same pair for the new replica).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorCids {
    /// Commitment to the sealed (or updated) replica.
    pub sealed_cid: Commitment,
    /// Commitment to the unsealed payload.
    pub unsealed_cid: Commitment,
}

/// Tagged result payload of a worker call.
///
/// The manager decodes the variant it expects for the stage it scheduled;
/// a mismatched tag is a protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutput {
    /// Stage with no output (fetch, finalize, move, remove, unseal).
    Unit,
    /// Boolean output (read-piece: whether the range was present).
    Bool(bool),
    /// A written piece (add-piece).
    Piece(PieceInfo),
    /// Pre-commit phase 1 output.
    PreCommit1(PreCommit1Output),
    /// Pre-commit phase 2 / replica-update commitments.
    SectorCids(SectorCids),
    /// Commit phase 1 output.
    Commit1(Commit1Output),
    /// A compressed proof (commit 2, prove-replica-update 2).
    Proof(Proof),
    /// Vanilla partition proofs (prove-replica-update 1).
    VanillaProofs(Vec<Vec<u8>>),
}

impl CallOutput {
    /// Name of the variant, for mismatch diagnostics.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Piece(_) => "piece",
            Self::PreCommit1(_) => "precommit1",
            Self::SectorCids(_) => "sector-cids",
            Self::Commit1(_) => "commit1",
            Self::Proof(_) => "proof",
            Self::VanillaProofs(_) => "vanilla-proofs",
        }
    }
}

/// The outcome of a worker call, delivered exactly once per [`CallId`].
pub type CallResult = Result<CallOutput, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_unique() {
        let sector = SectorId::new(1, 1);
        assert_ne!(CallId::new(sector), CallId::new(sector));
    }

    #[test]
    fn test_call_id_display_includes_sector_name() {
        let id = CallId::new(SectorId::new(1000, 7));
        assert!(id.to_string().starts_with("s-t01000-7-"));
    }

    #[test]
    fn test_output_variant_names() {
        assert_eq!(CallOutput::Unit.variant(), "unit");
        assert_eq!(CallOutput::Proof(vec![1, 2, 3]).variant(), "proof");
    }
}
