use super::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use super::{pick_worker, Scheduler, SlotTracker};

/// Walks the pending set in insertion order and pairs each task with the
/// first idle worker.
pub struct FifoScheduler;

impl Scheduler for FifoScheduler {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment> {
        let mut slots = SlotTracker::new(workers);
        let mut assignments = Vec::new();
        for task in pending {
            if !slots.any_free() {
                break;
            }
            let candidates = workers.iter().map(|w| &w.id);
            if let Some(worker) = pick_worker(candidates, &slots, task.prev_worker.as_ref()) {
                slots.take(&worker);
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
    use super::super::test_util::{task, worker};
    use super::super::Scheduler;
    use super::FifoScheduler;

    #[test]
    fn assigns_in_insertion_order() {
        let pending = vec![task("t0", 0), task("t1", 1), task("t2", 2)];
        let workers = vec![worker("w0"), worker("w1")];

        let assignments = FifoScheduler.select(&pending, &workers);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].task, "t0");
        assert_eq!(assignments[1].task, "t1");
        // Disjoint workers within one call.
        assert_ne!(assignments[0].worker, assignments[1].worker);
    }

    #[test]
    fn avoids_previous_worker_when_alternative_exists() {
        let mut pending = vec![task("t0", 0)];
        pending[0].prev_worker = Some("w0".to_string());
        let workers = vec![worker("w0"), worker("w1")];

        let assignments = FifoScheduler.select(&pending, &workers);
        assert_eq!(assignments[0].worker, "w1");

        // With a single worker, the previous one is used anyway.
        let workers = vec![worker("w0")];
        let assignments = FifoScheduler.select(&pending, &workers);
        assert_eq!(assignments[0].worker, "w0");
    }

    #[test]
    fn no_workers_no_assignments() {
        let pending = vec![task("t0", 0)];
        assert!(FifoScheduler.select(&pending, &[]).is_empty());
    }
}
