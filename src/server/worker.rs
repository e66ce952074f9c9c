use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::common::{Set, TaskId, WorkerId, WrappedRcRefCell};
use crate::error::CrowdError;
use crate::protocol;
use crate::protocol::messages::{DeviceSpecs, ToWorkerMessage};
use crate::scheduler::protocol::WorkerSnapshot;

/// Reliability bookkeeping: multiplicative decay per failure, linear recovery
/// per completion, clamped so a worker never becomes unschedulable forever.
const RELIABILITY_DECAY: f64 = 0.8;
const RELIABILITY_RECOVERY: f64 = 0.05;
const RELIABILITY_FLOOR: f64 = 0.05;

#[derive(Debug)]
pub struct Worker {
    pub id: WorkerId,
    sender: UnboundedSender<Bytes>,
    pub specs: DeviceSpecs,
    pub reliability: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_exec_ms: u64,
    /// Tasks currently assigned to this worker. `busy` means the set is at
    /// the configured concurrency limit; `gone` workers keep their history
    /// but are never selected.
    pub active_tasks: Set<TaskId>,
    pub alive: bool,
    pub last_heartbeat: Instant,
}

pub type WorkerRef = WrappedRcRefCell<Worker>;

impl Worker {
    pub fn send_message(&self, message: &ToWorkerMessage) -> crate::Result<()> {
        let data = protocol::serialize_message(message)?;
        self.sender
            .send(data)
            .map_err(|_| CrowdError::generic(format!("send to worker {} failed", self.id)))
    }

    /// Detaches the worker from its outbound queue so the connection's send
    /// forwarder can finish draining. Further sends fail, which the flush
    /// path already treats as a lost worker.
    pub fn close_channel(&mut self) {
        let (sender, _) = tokio::sync::mpsc::unbounded_channel();
        self.sender = sender;
    }

    #[inline]
    pub fn is_idle(&self, max_concurrent: usize) -> bool {
        self.alive && self.active_tasks.len() < max_concurrent
    }

    pub fn status_name(&self, max_concurrent: usize) -> &'static str {
        if !self.alive {
            "gone"
        } else if self.active_tasks.len() >= max_concurrent {
            "busy"
        } else {
            "idle"
        }
    }

    pub fn avg_exec_ms(&self) -> f64 {
        if self.tasks_completed == 0 {
            0.0
        } else {
            self.total_exec_ms as f64 / self.tasks_completed as f64
        }
    }

    pub fn record_completion(&mut self, exec_ms: u64) {
        self.tasks_completed += 1;
        self.total_exec_ms += exec_ms;
        self.reliability = (self.reliability + RELIABILITY_RECOVERY).min(1.0);
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.reliability = (self.reliability * RELIABILITY_DECAY).max(RELIABILITY_FLOOR);
    }

    pub fn make_snapshot(&self, max_concurrent: usize) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            active_tasks: self.active_tasks.len(),
            capacity: max_concurrent,
            avg_exec_ms: self.avg_exec_ms(),
            reliability: self.reliability,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            cpu_frequency_ghz: self.specs.cpu_frequency_ghz,
            num_cores: self.specs.num_cores,
            memory_gb: self.specs.memory_gb,
            battery_level: self.specs.battery_level,
            signal_strength: self.specs.signal_strength,
        }
    }
}

impl WorkerRef {
    pub fn new(id: WorkerId, specs: DeviceSpecs, sender: UnboundedSender<Bytes>) -> Self {
        Self::wrap(Worker {
            id,
            sender,
            specs,
            reliability: 1.0,
            tasks_completed: 0,
            tasks_failed: 0,
            total_exec_ms: 0,
            active_tasks: Default::default(),
            alive: true,
            last_heartbeat: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> WorkerRef {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        WorkerRef::new("w0".to_string(), DeviceSpecs::default(), tx)
    }

    #[test]
    fn availability_tracks_active_set_and_liveness() {
        let worker_ref = worker();
        assert!(worker_ref.get().is_idle(1));
        assert_eq!(worker_ref.get().status_name(1), "idle");

        worker_ref.get_mut().active_tasks.insert("t0".to_string());
        assert!(!worker_ref.get().is_idle(1));
        assert!(worker_ref.get().is_idle(2));
        assert_eq!(worker_ref.get().status_name(1), "busy");

        worker_ref.get_mut().alive = false;
        assert!(!worker_ref.get().is_idle(2));
        assert_eq!(worker_ref.get().status_name(1), "gone");
    }

    #[test]
    fn reliability_decays_and_recovers() {
        let worker_ref = worker();
        let mut worker = worker_ref.get_mut();
        worker.record_failure();
        assert!((worker.reliability - 0.8).abs() < 1e-9);
        worker.record_failure();
        assert!((worker.reliability - 0.64).abs() < 1e-9);
        worker.record_completion(100);
        assert!((worker.reliability - 0.69).abs() < 1e-9);

        for _ in 0..30 {
            worker.record_failure();
        }
        assert!(worker.reliability >= 0.05);
    }

    #[test]
    fn avg_exec_time_over_completions() {
        let worker_ref = worker();
        let mut worker = worker_ref.get_mut();
        assert_eq!(worker.avg_exec_ms(), 0.0);
        worker.record_completion(100);
        worker.record_completion(300);
        assert_eq!(worker.avg_exec_ms(), 200.0);
    }
}
