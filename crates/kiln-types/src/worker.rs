//! Worker capability descriptors.

use serde::{Deserialize, Serialize};

/// Hardware resources a worker has available.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerResources {
    /// Physical memory in bytes.
    pub physical_memory: u64,
    /// Swap memory in bytes.
    pub swap_memory: u64,
    /// Memory reserved for the system, unusable by tasks.
    pub reserved_memory: u64,
    /// Number of CPU threads.
    pub cpus: u64,
    /// GPU device names, if any.
    pub gpus: Vec<String>,
}

/// Identity and capability info advertised by a worker on registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Hostname, for logs only.
    pub hostname: String,
    /// Available hardware resources.
    pub resources: WorkerResources,
}
