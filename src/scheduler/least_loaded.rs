use crate::common::{Map, WorkerId};

use super::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use super::{Scheduler, SlotTracker};

/// Pairs each task with the idle worker carrying the least load, keyed
/// lexicographically by `(active tasks, recent average execution time)`.
/// Ties break by worker id so the choice is deterministic.
pub struct LeastLoadedScheduler;

impl LeastLoadedScheduler {
    fn pick(
        workers: &[WorkerSnapshot],
        slots: &SlotTracker,
        extra_load: &Map<WorkerId, usize>,
        prev: Option<&WorkerId>,
    ) -> Option<WorkerId> {
        let key = |w: &WorkerSnapshot| {
            let load = w.active_tasks + extra_load.get(&w.id).copied().unwrap_or(0);
            (load, (w.avg_exec_ms * 1000.0) as u64, w.id.clone())
        };
        let candidate = workers
            .iter()
            .filter(|w| slots.has_free(&w.id) && Some(&w.id) != prev)
            .min_by_key(|w| key(w))
            .or_else(|| {
                workers
                    .iter()
                    .filter(|w| slots.has_free(&w.id))
                    .min_by_key(|w| key(w))
            })?;
        Some(candidate.id.clone())
    }
}

impl Scheduler for LeastLoadedScheduler {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment> {
        let mut slots = SlotTracker::new(workers);
        let mut extra_load: Map<WorkerId, usize> = Default::default();
        let mut assignments = Vec::new();
        for task in pending {
            if !slots.any_free() {
                break;
            }
            if let Some(worker) =
                Self::pick(workers, &slots, &extra_load, task.prev_worker.as_ref())
            {
                slots.take(&worker);
                *extra_load.entry(worker.clone()).or_default() += 1;
                assignments.push(Assignment {
                    task: task.id.clone(),
                    worker,
                });
            }
        }
        assignments
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{task, worker, worker_with_stats};
    use super::super::Scheduler;
    use super::LeastLoadedScheduler;

    #[test]
    fn prefers_lower_active_count_then_exec_time() {
        let mut busy = worker("w0");
        busy.active_tasks = 1;
        busy.capacity = 2;
        let slow = worker_with_stats("w1", 900.0, 1.0);
        let fast = worker_with_stats("w2", 100.0, 1.0);

        let assignments =
            LeastLoadedScheduler.select(&[task("t0", 0)], &[busy, slow, fast]);
        assert_eq!(assignments[0].worker, "w2");
    }

    #[test]
    fn ties_break_by_worker_id() {
        let workers = vec![worker("wb"), worker("wa")];
        let assignments = LeastLoadedScheduler.select(&[task("t0", 0)], &workers);
        assert_eq!(assignments[0].worker, "wa");
    }

    #[test]
    fn spreads_batch_across_workers() {
        let mut w0 = worker("w0");
        w0.capacity = 2;
        let mut w1 = worker("w1");
        w1.capacity = 2;

        let pending = vec![task("t0", 0), task("t1", 1), task("t2", 2)];
        let assignments = LeastLoadedScheduler.select(&pending, &[w0, w1]);
        assert_eq!(assignments.len(), 3);
        // First two land on distinct workers before anyone gets a second task.
        assert_ne!(assignments[0].worker, assignments[1].worker);
    }
}
