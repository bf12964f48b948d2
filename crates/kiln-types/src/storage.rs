//! Storage location descriptors.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// File name of the persisted per-path descriptor at the root of each
/// storage path.
pub const METADATA_FILE: &str = "sectorstore.json";

/// Opaque identifier for one storage location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl StorageId {
    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StorageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Capability and reachability descriptor for a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// The location's identity.
    pub id: StorageId,
    /// Transport endpoints (fetch-server base URLs) reaching this location.
    pub urls: Vec<String>,
    /// Relative preference weight for allocation scoring.
    pub weight: u64,
    /// Whether sealing scratch artifacts may be placed here.
    pub can_seal: bool,
    /// Whether long-term artifacts may be placed here.
    pub can_store: bool,
    /// Whether this location holds the preferred copy of a sector file.
    /// Only meaningful in find results.
    pub is_primary: bool,
}

/// Point-in-time usage snapshot of a storage path, including outstanding
/// in-memory reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FsStat {
    /// Total filesystem capacity in bytes.
    pub capacity: u64,
    /// Bytes available for new data, net of reservations.
    pub available: u64,
    /// Bytes reserved by in-flight allocations.
    pub reserved: u64,
}

/// A health report pushed for an open storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Usage snapshot, zeroed when `error` is set.
    pub stat: FsStat,
    /// Set when the path could not be inspected.
    pub error: Option<String>,
}

/// A locally accessible storage path, as advertised by workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePath {
    /// The location's identity.
    pub id: StorageId,
    /// Allocation weight.
    pub weight: u64,
    /// Filesystem root of the path.
    pub local_path: PathBuf,
    /// Whether sealing scratch artifacts may be placed here.
    pub can_seal: bool,
    /// Whether long-term artifacts may be placed here.
    pub can_store: bool,
}

/// The persisted per-path descriptor (`sectorstore.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageMeta {
    /// The location's identity.
    pub id: StorageId,
    /// Allocation weight.
    pub weight: u64,
    /// Whether sealing scratch artifacts may be placed here.
    pub can_seal: bool,
    /// Whether long-term artifacts may be placed here.
    pub can_store: bool,
}

/// The role a path plays for an acquisition: sealing scratch or
/// long-term storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathType {
    /// Sealing scratch space.
    Sealing,
    /// Long-term storage.
    Storage,
}

/// Whether relocating an artifact transfers or duplicates the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquireMode {
    /// Transfer the artifact (source is dropped after the move).
    Move,
    /// Duplicate the artifact (source stays in place).
    Copy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_meta_json_roundtrip() {
        let meta = LocalStorageMeta {
            id: StorageId::from("f47ac10b-58cc-4372-a567-0e02b2c3d479"),
            weight: 10,
            can_seal: true,
            can_store: false,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: LocalStorageMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_storage_id_serializes_transparent() {
        let id = StorageId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_fs_stat_json_field_names() {
        let stat = FsStat {
            capacity: 100,
            available: 60,
            reserved: 5,
        };
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["capacity"], 100);
        assert_eq!(json["available"], 60);
        assert_eq!(json["reserved"], 5);
    }
}
