use rand::Rng;

use super::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use super::{priority_key, LeastLoadedScheduler, Scheduler, SlotTracker};

/// Objective weights: energy, makespan, load variance, priority
/// satisfaction, deadline penalty.
const W_ENERGY: f64 = 0.30;
const W_MAKESPAN: f64 = 0.25;
const W_LOAD_VARIANCE: f64 = 0.20;
const W_PRIORITY: f64 = 0.15;
const W_DEADLINE: f64 = 0.10;

/// Particle-swarm optimiser over the full `(tasks x workers)` assignment
/// matrix. Too expensive for the message-handling path, so it advertises
/// `offloaded` and the dispatcher runs it on the blocking pool; results are
/// applied atomically after the usual re-verification. Below the problem-size
/// thresholds the swarm is pointless and the strategy falls back to
/// least-loaded selection.
pub struct PsoScheduler {
    particles: usize,
    iterations: usize,
    inertia_max: f64,
    inertia_min: f64,
    cognitive: f64,
    social: f64,
    min_tasks: usize,
    min_workers: usize,
    stagnation_limit: usize,
    fallback: LeastLoadedScheduler,
}

impl Default for PsoScheduler {
    fn default() -> Self {
        Self {
            particles: 30,
            iterations: 50,
            inertia_max: 0.9,
            inertia_min: 0.1,
            cognitive: 2.0,
            social: 2.0,
            min_tasks: 3,
            min_workers: 2,
            stagnation_limit: 15,
            fallback: LeastLoadedScheduler,
        }
    }
}

struct Particle {
    position: Vec<f64>,
    velocity: Vec<f64>,
    best_position: Vec<f64>,
    best_fitness: f64,
}

fn clip_to_worker(value: f64, num_workers: usize) -> usize {
    (value.round().max(0.0) as usize).min(num_workers - 1)
}

fn fitness(position: &[f64], tasks: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> f64 {
    let mut loads = vec![0.0f64; workers.len()];
    let mut memory_used = vec![0.0f64; workers.len()];
    let mut energy = 0.0;
    let mut priority_penalty = 0.0;
    let mut deadline_penalty = 0.0;

    for (i, task) in tasks.iter().enumerate() {
        let widx = clip_to_worker(position[i], workers.len());
        let worker = &workers[widx];
        let capacity = worker.computational_capacity();
        if capacity <= 0.0 {
            return f64::INFINITY;
        }

        let exec_time = task.comp_requirement / capacity;
        loads[widx] += exec_time;
        memory_used[widx] += task.mem_requirement;

        let power = capacity / worker.power_efficiency();
        energy += power * exec_time;

        let priority = task.priority.clamp(1, 5) as f64;
        priority_penalty += (6.0 - priority) * (1.0 / (worker.efficiency_score() + 0.1));

        if let Some(deadline) = task.deadline_secs {
            if loads[widx] > deadline {
                deadline_penalty += (loads[widx] - deadline) * 10.0;
            }
        }
    }

    let makespan = loads.iter().cloned().fold(0.0, f64::max);
    let mean = loads.iter().sum::<f64>() / loads.len() as f64;
    let variance =
        loads.iter().map(|l| (l - mean) * (l - mean)).sum::<f64>() / loads.len() as f64;

    let mut memory_violation = 0.0;
    for (used, worker) in memory_used.iter().zip(workers) {
        if *used > worker.memory_gb {
            memory_violation += (used - worker.memory_gb) * 100.0;
        }
    }

    W_ENERGY * energy
        + W_MAKESPAN * makespan
        + W_LOAD_VARIANCE * variance
        + W_PRIORITY * priority_penalty
        + W_DEADLINE * deadline_penalty
        + memory_violation
}

impl PsoScheduler {
    fn optimise(&self, tasks: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<usize> {
        let mut rng = rand::thread_rng();
        let num_workers = workers.len();

        let mut swarm: Vec<Particle> = (0..self.particles)
            .map(|_| {
                let position: Vec<f64> = (0..tasks.len())
                    .map(|_| rng.gen_range(0.0..num_workers as f64))
                    .collect();
                let velocity = (0..tasks.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let best_fitness = fitness(&position, tasks, workers);
                Particle {
                    best_position: position.clone(),
                    position,
                    velocity,
                    best_fitness,
                }
            })
            .collect();

        let mut global_best = swarm
            .iter()
            .min_by(|a, b| a.best_fitness.partial_cmp(&b.best_fitness).unwrap())
            .map(|p| (p.best_position.clone(), p.best_fitness))
            .unwrap();

        let mut stagnant = 0;
        for iteration in 0..self.iterations {
            let inertia = self.inertia_max
                - (self.inertia_max - self.inertia_min) * iteration as f64
                    / self.iterations as f64;

            let mut improved = false;
            for particle in &mut swarm {
                for d in 0..particle.position.len() {
                    let r1: f64 = rng.gen();
                    let r2: f64 = rng.gen();
                    particle.velocity[d] = inertia * particle.velocity[d]
                        + self.cognitive * r1 * (particle.best_position[d] - particle.position[d])
                        + self.social * r2 * (global_best.0[d] - particle.position[d]);
                    particle.position[d] =
                        (particle.position[d] + particle.velocity[d]).clamp(0.0, (num_workers - 1) as f64);
                }

                let value = fitness(&particle.position, tasks, workers);
                if value < particle.best_fitness {
                    particle.best_fitness = value;
                    particle.best_position = particle.position.clone();
                }
                if value < global_best.1 {
                    global_best = (particle.position.clone(), value);
                    improved = true;
                }
            }

            if improved {
                stagnant = 0;
            } else {
                stagnant += 1;
                if stagnant >= self.stagnation_limit {
                    break;
                }
            }
        }

        global_best
            .0
            .iter()
            .map(|v| clip_to_worker(*v, num_workers))
            .collect()
    }
}

impl Scheduler for PsoScheduler {
    fn name(&self) -> &'static str {
        "pso"
    }

    fn offloaded(&self) -> bool {
        true
    }

    fn select(&mut self, pending: &[TaskSnapshot], workers: &[WorkerSnapshot]) -> Vec<Assignment> {
        if pending.len() < self.min_tasks || workers.len() < self.min_workers {
            return self.fallback.select(pending, workers);
        }

        let matrix = self.optimise(pending, workers);

        // The swarm output ignores per-worker capacity; settle it greedily in
        // priority order. Tasks that lose their slot stay pending for the
        // next dispatch round.
        let mut order: Vec<usize> = (0..pending.len()).collect();
        order.sort_by_key(|&i| priority_key(&pending[i]));

        let mut slots = SlotTracker::new(workers);
        let mut assignments = Vec::new();
        for i in order {
            let widx = matrix[i];
            let worker = &workers[widx];
            if slots.take(&worker.id) {
                assignments.push(Assignment {
                    task: pending[i].id.clone(),
                    worker: worker.id.clone(),
                });
            }
        }
        assignments
    }
}

#[cfg(test)]
mod tests {
    use crate::common::Set;

    use super::super::test_util::{task, task_with_priority, worker, worker_with_stats};
    use super::super::Scheduler;
    use super::PsoScheduler;

    #[test]
    fn below_thresholds_falls_back_to_least_loaded() {
        let mut scheduler = PsoScheduler::default();
        let pending = vec![task("t0", 0)];
        let workers = vec![worker_with_stats("w0", 500.0, 1.0), worker("w1")];

        let assignments = scheduler.select(&pending, &workers);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].worker, "w1");
    }

    #[test]
    fn swarm_respects_capacity_and_disjointness() {
        let mut scheduler = PsoScheduler::default();
        let pending = vec![
            task_with_priority("t0", 0, 1),
            task("t1", 1),
            task("t2", 2),
            task("t3", 3),
        ];
        let workers = vec![worker("w0"), worker("w1"), worker("w2")];

        let assignments = scheduler.select(&pending, &workers);
        assert!(!assignments.is_empty());
        assert!(assignments.len() <= workers.len());

        let tasks: Set<&str> = assignments.iter().map(|a| a.task.as_str()).collect();
        assert_eq!(tasks.len(), assignments.len());
        let used: Set<&str> = assignments.iter().map(|a| a.worker.as_str()).collect();
        assert_eq!(used.len(), assignments.len());
        for a in &assignments {
            assert!(workers.iter().any(|w| w.id == a.worker));
        }
    }

    #[test]
    fn runs_off_the_message_path() {
        assert!(PsoScheduler::default().offloaded());
    }
}
