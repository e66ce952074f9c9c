pub mod protocol;

mod fifo;
mod least_loaded;
mod performance;
mod priority;
mod pso;
mod round_robin;

pub use fifo::FifoScheduler;
pub use least_loaded::LeastLoadedScheduler;
pub use performance::PerformanceScheduler;
pub use priority::PriorityScheduler;
pub use pso::PsoScheduler;
pub use round_robin::RoundRobinScheduler;

use crate::common::{Map, TaskId, WorkerId};
use crate::config::SchedulerKind;
use crate::protocol::messages::FailureKind;
use protocol::{Assignment, TaskSnapshot, WorkerSnapshot};

/// A scheduling strategy: a pure selection over snapshots of the pending-task
/// set and the eligible-worker set. Selections are non-authoritative; the
/// dispatcher re-checks task and worker state before committing. Strategies
/// must not block; the one exception (`PsoScheduler`) advertises itself via
/// `offloaded` and is run on the blocking pool.
pub trait Scheduler: Send {
    fn name(&self) -> &'static str;

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment>;

    fn on_failure(&mut self, _worker: &WorkerId, _task: &TaskId, _cause: FailureKind) {}

    /// True when `select` is too expensive for the message-handling path.
    fn offloaded(&self) -> bool {
        false
    }
}

pub fn create_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Fifo => Box::new(FifoScheduler),
        SchedulerKind::RoundRobin => Box::new(RoundRobinScheduler::default()),
        SchedulerKind::LeastLoaded => Box::new(LeastLoadedScheduler),
        SchedulerKind::Performance => Box::new(PerformanceScheduler),
        SchedulerKind::Priority => Box::new(PriorityScheduler),
        SchedulerKind::Pso => Box::new(PsoScheduler::default()),
    }
}

/// Remaining capacity per worker, shared bookkeeping for all strategies so a
/// single `select` call never produces overlapping workers.
pub(crate) struct SlotTracker {
    slots: Map<WorkerId, usize>,
}

impl SlotTracker {
    pub fn new(workers: &[WorkerSnapshot]) -> Self {
        Self {
            slots: workers
                .iter()
                .map(|w| (w.id.clone(), w.free_slots()))
                .collect(),
        }
    }

    pub fn has_free(&self, worker: &WorkerId) -> bool {
        self.slots.get(worker).copied().unwrap_or(0) > 0
    }

    pub fn any_free(&self) -> bool {
        self.slots.values().any(|&slots| slots > 0)
    }

    pub fn take(&mut self, worker: &WorkerId) -> bool {
        match self.slots.get_mut(worker) {
            Some(slots) if *slots > 0 => {
                *slots -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Picks the first of `candidates` (an iterator of worker ids in preference
/// order) with a free slot, avoiding the task's previous worker when any
/// other candidate is available.
pub(crate) fn pick_worker<'a, I>(
    candidates: I,
    slots: &SlotTracker,
    prev_worker: Option<&WorkerId>,
) -> Option<WorkerId>
where
    I: Iterator<Item = &'a WorkerId> + Clone,
{
    let preferred = candidates
        .clone()
        .find(|id| slots.has_free(id) && Some(*id) != prev_worker);
    preferred
        .or_else(|| candidates.clone().find(|id| slots.has_free(id)))
        .cloned()
}

/// Sort key used by the priority-aware strategies: explicit priority first
/// (1 = highest), then submission order, then insertion index.
pub(crate) fn priority_key(task: &TaskSnapshot) -> (i32, u64, usize) {
    (task.priority, task.seq, task.index)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::protocol::{TaskSnapshot, WorkerSnapshot};

    pub fn task(id: &str, index: usize) -> TaskSnapshot {
        TaskSnapshot {
            id: id.to_string(),
            job_id: "j".to_string(),
            index,
            priority: 5,
            attempts: 0,
            seq: 0,
            comp_requirement: 1.0,
            mem_requirement: 0.0,
            prev_worker: None,
            deadline_secs: None,
        }
    }

    pub fn task_with_priority(id: &str, index: usize, priority: i32) -> TaskSnapshot {
        TaskSnapshot {
            priority,
            ..task(id, index)
        }
    }

    pub fn worker(id: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            id: id.to_string(),
            active_tasks: 0,
            capacity: 1,
            avg_exec_ms: 0.0,
            reliability: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            cpu_frequency_ghz: 1.0,
            num_cores: 1,
            memory_gb: 4.0,
            battery_level: 100.0,
            signal_strength: 5,
        }
    }

    pub fn worker_with_stats(id: &str, avg_exec_ms: f64, reliability: f64) -> WorkerSnapshot {
        WorkerSnapshot {
            avg_exec_ms,
            reliability,
            ..worker(id)
        }
    }
}
