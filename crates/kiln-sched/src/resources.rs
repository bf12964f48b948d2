//! Per-task resource needs and per-worker resource accounting.

use kiln_types::{RegisteredSealProof, TaskType, WorkerResources};

/// Resources a task needs on the worker that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskResources {
    /// Memory that must be physically available.
    pub min_memory: u64,
    /// Memory the task may grow to (may spill to swap).
    pub max_memory: u64,
    /// Threads the task pins; `None` uses all cores (exclusive).
    pub threads: Option<u64>,
    /// Whether the task wants a GPU when one is present.
    pub can_gpu: bool,
    /// Baseline allocation independent of sector size.
    pub base_min_memory: u64,
}

/// Resource needs per task type, scaled by the proof's sector size.
///
/// The ratios are tunable operating estimates, bounding admission rather
/// than measuring real usage.
pub fn resource_table(task: TaskType, proof: RegisteredSealProof) -> TaskResources {
    let size = proof.sector_size();
    match task {
        // IO-bound stages.
        TaskType::AddPiece | TaskType::Fetch | TaskType::ReadUnsealed | TaskType::Finalize => {
            TaskResources {
                min_memory: size,
                max_memory: size,
                threads: Some(1),
                can_gpu: false,
                base_min_memory: 1 << 20,
            }
        }
        // Replica generation holds the unsealed data plus working layers.
        TaskType::PreCommit1 | TaskType::ReplicaUpdate | TaskType::Unseal => TaskResources {
            min_memory: size + size / 2,
            max_memory: 2 * size,
            threads: Some(1),
            can_gpu: false,
            base_min_memory: 1 << 30,
        },
        // Tree building wants every core and real memory headroom.
        TaskType::PreCommit2 | TaskType::ProveReplicaUpdate1 => TaskResources {
            min_memory: 2 * size,
            max_memory: 3 * size,
            threads: None,
            can_gpu: true,
            base_min_memory: 1 << 30,
        },
        // Vanilla proofs are cheap.
        TaskType::Commit1 => TaskResources {
            min_memory: 1 << 30,
            max_memory: 1 << 30,
            threads: Some(0),
            can_gpu: false,
            base_min_memory: 1 << 30,
        },
        // Snark compression is GPU-heavy.
        TaskType::Commit2 | TaskType::ProveReplicaUpdate2 => TaskResources {
            min_memory: 5 * size,
            max_memory: 6 * size,
            threads: None,
            can_gpu: true,
            base_min_memory: 1 << 30,
        },
    }
}

impl TaskResources {
    fn threads(&self, worker_cpus: u64) -> u64 {
        match self.threads {
            Some(t) => t,
            None => worker_cpus,
        }
    }
}

/// Resources committed on a worker by preparing or running tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveResources {
    /// Sum of admitted min-memory needs.
    pub memory_used_min: u64,
    /// Sum of admitted max-memory needs.
    pub memory_used_max: u64,
    /// Whether a GPU-wanting task is admitted.
    pub gpu_used: bool,
    /// Threads committed.
    pub cpu_use: u64,
}

impl ActiveResources {
    /// Commit a task's needs.
    pub fn add(&mut self, worker: &WorkerResources, needs: &TaskResources) {
        if needs.can_gpu && !worker.gpus.is_empty() {
            self.gpu_used = true;
        }
        self.cpu_use += needs.threads(worker.cpus);
        self.memory_used_min += needs.min_memory;
        self.memory_used_max += needs.max_memory;
    }

    /// Return a task's committed needs.
    pub fn free(&mut self, worker: &WorkerResources, needs: &TaskResources) {
        if needs.can_gpu && !worker.gpus.is_empty() {
            self.gpu_used = false;
        }
        self.cpu_use = self.cpu_use.saturating_sub(needs.threads(worker.cpus));
        self.memory_used_min = self.memory_used_min.saturating_sub(needs.min_memory);
        self.memory_used_max = self.memory_used_max.saturating_sub(needs.max_memory);
    }

    /// Whether the worker can admit a task with the given needs on top of
    /// what this window already holds.
    pub fn can_handle(&self, needs: &TaskResources, worker: &WorkerResources) -> bool {
        let min_need = needs.min_memory + needs.base_min_memory + worker.reserved_memory;
        if self.memory_used_min + min_need > worker.physical_memory {
            return false;
        }
        if self.memory_used_max + needs.max_memory + worker.reserved_memory
            > worker.physical_memory + worker.swap_memory
        {
            return false;
        }
        if self.cpu_use + needs.threads(worker.cpus) > worker.cpus {
            return false;
        }
        if needs.can_gpu && !worker.gpus.is_empty() && self.gpu_used {
            return false;
        }
        true
    }

    /// Committed-to-available ratio, the preference metric: the most
    /// loaded dimension dominates.
    pub fn utilization(&self, worker: &WorkerResources) -> f64 {
        let mut max = 0f64;
        if worker.cpus > 0 {
            max = max.max(self.cpu_use as f64 / worker.cpus as f64);
        }
        if worker.physical_memory > 0 {
            max = max.max(self.memory_used_min as f64 / worker.physical_memory as f64);
        }
        if worker.physical_memory + worker.swap_memory > 0 {
            max = max.max(
                self.memory_used_max as f64
                    / (worker.physical_memory + worker.swap_memory) as f64,
            );
        }
        max
    }
}
