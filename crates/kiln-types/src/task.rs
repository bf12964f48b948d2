//! Pipeline stage (task) types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerated pipeline stages a worker can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskType {
    /// Write a piece into an unsealed sector file.
    AddPiece,
    /// First pre-commit phase (replica generation + tree building start).
    PreCommit1,
    /// Second pre-commit phase (tree building, commitment output).
    PreCommit2,
    /// First commit phase (vanilla proofs).
    Commit1,
    /// Second commit phase (snark compression).
    Commit2,
    /// Unseal a range of a sealed sector.
    Unseal,
    /// Read a range of an unsealed sector file.
    ReadUnsealed,
    /// Prune seal scratch and move artifacts to long-term storage.
    Finalize,
    /// Fetch sector artifacts from a peer.
    Fetch,
    /// Produce an updated replica from new pieces (snap deal).
    ReplicaUpdate,
    /// First phase of the replica-update proof.
    ProveReplicaUpdate1,
    /// Second phase of the replica-update proof.
    ProveReplicaUpdate2,
}

impl TaskType {
    /// Short stable name, used in logs and work fingerprints.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddPiece => "seal/addpiece",
            Self::PreCommit1 => "seal/precommit/1",
            Self::PreCommit2 => "seal/precommit/2",
            Self::Commit1 => "seal/commit/1",
            Self::Commit2 => "seal/commit/2",
            Self::Unseal => "seal/unseal",
            Self::ReadUnsealed => "seal/read",
            Self::Finalize => "seal/finalize",
            Self::Fetch => "seal/fetch",
            Self::ReplicaUpdate => "seal/replicaupdate",
            Self::ProveReplicaUpdate1 => "seal/provereplicaupdate/1",
            Self::ProveReplicaUpdate2 => "seal/provereplicaupdate/2",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
