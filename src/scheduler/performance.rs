use super::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use super::{Scheduler, SlotTracker};

/// Pairs the highest-priority pending task with the best-scoring worker.
/// A worker's score is `reliability * 1 / (1 + recent_avg_exec_secs)`; the
/// reliability component decays after failures and recovers with completions
/// (maintained by the core), so chronically failing workers sink to the
/// bottom of the ranking without being excluded outright.
pub struct PerformanceScheduler;

fn score(worker: &WorkerSnapshot) -> f64 {
    worker.reliability * (1.0 / (1.0 + worker.avg_exec_ms / 1000.0))
}

impl Scheduler for PerformanceScheduler {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment> {
        // Highest priority first; among equals, tasks with fewer attempts go
        // ahead of chronic failures.
        let mut tasks: Vec<&TaskSnapshot> = pending.iter().collect();
        tasks.sort_by_key(|t| (t.priority, t.attempts, t.seq, t.index));

        let mut ranked: Vec<&WorkerSnapshot> = workers.iter().collect();
        ranked.sort_by(|a, b| {
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut slots = SlotTracker::new(workers);
        let mut assignments = Vec::new();
        for task in tasks {
            if !slots.any_free() {
                break;
            }
            let candidates = ranked.iter().map(|w| &w.id);
            if let Some(worker) = super::pick_worker(candidates, &slots, task.prev_worker.as_ref())
            {
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
    use super::super::test_util::{task_with_priority, worker_with_stats};
    use super::super::Scheduler;
    use super::PerformanceScheduler;

    #[test]
    fn best_worker_gets_highest_priority_task() {
        let reliable = worker_with_stats("w0", 200.0, 1.0);
        let flaky = worker_with_stats("w1", 200.0, 0.4);

        let pending = vec![
            task_with_priority("low", 0, 5),
            task_with_priority("high", 1, 1),
        ];
        let assignments = PerformanceScheduler.select(&pending, &[flaky, reliable]);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].task, "high");
        assert_eq!(assignments[0].worker, "w0");
        assert_eq!(assignments[1].task, "low");
        assert_eq!(assignments[1].worker, "w1");
    }

    #[test]
    fn slow_worker_ranks_below_fast_one() {
        let fast = worker_with_stats("slow-id-wins-ties", 100.0, 0.9);
        let slow = worker_with_stats("a", 5000.0, 0.9);

        let pending = vec![task_with_priority("t0", 0, 1)];
        let assignments = PerformanceScheduler.select(&pending, &[slow, fast]);
        assert_eq!(assignments[0].worker, "slow-id-wins-ties");
    }
}
