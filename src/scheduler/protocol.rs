use crate::common::{JobId, TaskId, WorkerId};

/// Immutable view of one pending task handed to a strategy. Snapshots are
/// taken under the core borrow; a strategy's output is advisory and is
/// re-verified by the dispatcher before it commits.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub job_id: JobId,
    pub index: usize,
    /// Explicit priority, 1 is the highest. Defaults to 5.
    pub priority: i32,
    pub attempts: u32,
    /// Global submission order of the owning job.
    pub seq: u64,
    pub comp_requirement: f64,
    pub mem_requirement: f64,
    /// Worker that last held this task, if it failed or was reverted.
    /// Strategies prefer a different worker when one is available.
    pub prev_worker: Option<WorkerId>,
    /// Seconds until the owning job's deadline at snapshot time.
    pub deadline_secs: Option<f64>,
}

/// Immutable view of one eligible (alive, spare capacity) worker.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub active_tasks: usize,
    pub capacity: usize,
    pub avg_exec_ms: f64,
    pub reliability: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub cpu_frequency_ghz: f64,
    pub num_cores: u32,
    pub memory_gb: f64,
    pub battery_level: f64,
    pub signal_strength: u32,
}

impl WorkerSnapshot {
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.active_tasks)
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / total as f64
        }
    }

    pub fn computational_capacity(&self) -> f64 {
        self.cpu_frequency_ghz * self.num_cores as f64
    }

    /// Combined desirability used by the swarm objective: raw capacity scaled
    /// by battery, signal and observed reliability.
    pub fn efficiency_score(&self) -> f64 {
        self.computational_capacity()
            * (self.battery_level / 100.0)
            * (self.signal_strength as f64 / 5.0)
            * self.reliability
    }

    pub fn power_efficiency(&self) -> f64 {
        self.computational_capacity() / (self.computational_capacity() * 0.2 + 0.5)
    }
}

/// A `(task, worker)` pair proposed by a strategy. Pairs returned from one
/// `select` call cover disjoint tasks and never oversubscribe a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task: TaskId,
    pub worker: WorkerId,
}
