use super::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use super::{pick_worker, priority_key, Scheduler, SlotTracker};

/// Sorts the pending set by explicit priority (1 is the highest) and falls
/// back to FIFO order inside a priority band. Tasks in the top bands are
/// steered to the workers with the best success rate; everything else takes
/// the plain first-idle worker.
pub struct PriorityScheduler;

const HIGH_PRIORITY_BAND: i32 = 2;

impl Scheduler for PriorityScheduler {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment> {
        let mut tasks: Vec<&TaskSnapshot> = pending.iter().collect();
        tasks.sort_by_key(|t| priority_key(t));

        let mut by_success: Vec<&WorkerSnapshot> = workers.iter().collect();
        by_success.sort_by(|a, b| {
            b.success_rate()
                .partial_cmp(&a.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut slots = SlotTracker::new(workers);
        let mut assignments = Vec::new();
        for task in tasks {
            if !slots.any_free() {
                break;
            }
            let picked = if task.priority <= HIGH_PRIORITY_BAND {
                let candidates = by_success.iter().map(|w| &w.id);
                pick_worker(candidates, &slots, task.prev_worker.as_ref())
            } else {
                let candidates = workers.iter().map(|w| &w.id);
                pick_worker(candidates, &slots, task.prev_worker.as_ref())
            };
            if let Some(worker) = picked {
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
