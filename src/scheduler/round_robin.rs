use crate::common::{TaskId, WorkerId};
use crate::protocol::messages::FailureKind;

use super::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use super::{Scheduler, SlotTracker};

/// Rotates a cursor over the idle workers (sorted by id) and hands the next
/// pending task to the worker under the cursor. The ring is rebuilt whenever
/// the eligible set changes, which resets the cursor; with a single worker
/// this degenerates to serial FIFO.
#[derive(Default)]
pub struct RoundRobinScheduler {
    ring: Vec<WorkerId>,
    cursor: usize,
}

impl Scheduler for RoundRobinScheduler {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment> {
        let mut ring: Vec<WorkerId> = workers.iter().map(|w| w.id.clone()).collect();
        ring.sort();
        if ring != self.ring {
            self.ring = ring;
            self.cursor = 0;
        }
        if self.ring.is_empty() {
            return Vec::new();
        }

        let mut slots = SlotTracker::new(workers);
        let mut assignments = Vec::new();
        for task in pending {
            if !slots.any_free() {
                break;
            }
            let mut advanced = 0;
            while advanced < self.ring.len() {
                let worker = self.ring[self.cursor % self.ring.len()].clone();
                self.cursor = (self.cursor + 1) % self.ring.len();
                advanced += 1;
                if slots.take(&worker) {
                    assignments.push(Assignment {
                        task: task.id.clone(),
                        worker,
                    });
                    break;
                }
            }
        }
        assignments
    }

    fn on_failure(&mut self, worker: &WorkerId, _task: &TaskId, _cause: FailureKind) {
        // Drop the worker from the ring so the cursor does not keep landing
        // on it before the next rebuild.
        if let Some(position) = self.ring.iter().position(|id| id == worker) {
            self.ring.remove(position);
            if position < self.cursor {
                self.cursor -= 1;
            }
            if !self.ring.is_empty() {
                self.cursor %= self.ring.len();
            } else {
                self.cursor = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{task, worker};
    use super::super::Scheduler;
    use super::RoundRobinScheduler;
    use crate::protocol::messages::FailureKind;

    #[test]
    fn rotates_across_calls() {
        let mut scheduler = RoundRobinScheduler::default();
        let workers = vec![worker("w0"), worker("w1"), worker("w2")];

        let first = scheduler.select(&[task("t0", 0)], &workers);
        assert_eq!(first[0].worker, "w0");
        let second = scheduler.select(&[task("t1", 1)], &workers);
        assert_eq!(second[0].worker, "w1");
        let third = scheduler.select(&[task("t2", 2)], &workers);
        assert_eq!(third[0].worker, "w2");
        let fourth = scheduler.select(&[task("t3", 3)], &workers);
        assert_eq!(fourth[0].worker, "w0");
    }

    #[test]
    fn membership_change_resets_cursor() {
        let mut scheduler = RoundRobinScheduler::default();
        let workers = vec![worker("w0"), worker("w1")];
        scheduler.select(&[task("t0", 0)], &workers);

        let workers = vec![worker("w0"), worker("w1"), worker("w2")];
        let assignments = scheduler.select(&[task("t1", 1)], &workers);
        assert_eq!(assignments[0].worker, "w0");
    }

    #[test]
    fn single_worker_degenerates_to_fifo() {
        let mut scheduler = RoundRobinScheduler::default();
        let mut workers = vec![worker("w0")];
        workers[0].capacity = 1;

        let pending = vec![task("t0", 0), task("t1", 1)];
        let assignments = scheduler.select(&pending, &workers);
        // Only one slot; the first task in insertion order wins it.
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].task, "t0");
        assert_eq!(assignments[0].worker, "w0");
    }

    #[test]
    fn failure_prunes_ring_until_rebuild() {
        let mut scheduler = RoundRobinScheduler::default();
        let workers = vec![worker("w0"), worker("w1")];
        scheduler.select(&[task("t0", 0)], &workers);

        scheduler.on_failure(&"w0".to_string(), &"t0".to_string(), FailureKind::Disconnect);
        let assignments = scheduler.select(&[task("t1", 1)], &[worker("w1")]);
        assert_eq!(assignments[0].worker, "w1");
    }
}
