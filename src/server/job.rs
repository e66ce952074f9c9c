use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::common::{JobId, WrappedRcRefCell};
use crate::protocol::messages::{TaskFailure, TaskStatusCounts};
use crate::server::client::Client;
use crate::server::task::TaskRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    /// Global submission order, used for FIFO scheduling across jobs.
    pub seq: u64,
    pub status: JobStatus,
    pub total_tasks: usize,
    /// Child tasks in insertion order; the index of a task in this vector
    /// equals its `index` attribute.
    pub tasks: Vec<TaskRef>,
    pub client: Option<Client>,
    pub priority: i32,
    pub checkpoint_interval: Option<f64>,
    pub deadline: Option<Instant>,
    pub created_at: DateTime<Utc>,
}

pub type JobRef = WrappedRcRefCell<Job>;

impl Job {
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.get().is_terminal())
    }

    pub fn any_task_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.get().is_failed())
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.get().is_finished()).count()
    }

    pub fn status_counts(&self) -> TaskStatusCounts {
        let mut counts = TaskStatusCounts::default();
        for task_ref in &self.tasks {
            match task_ref.get().status_name() {
                "pending" => counts.pending += 1,
                "assigned" => counts.assigned += 1,
                "running" => counts.running += 1,
                "completed" => counts.completed += 1,
                _ => counts.failed += 1,
            }
        }
        counts
    }

    /// Result vector in submission order. Only meaningful once every task is
    /// finished; a missing result would violate the completion invariant, so
    /// it surfaces as a null entry rather than a panic.
    pub fn collect_results(&self) -> Vec<serde_json::Value> {
        self.tasks
            .iter()
            .map(|t| t.get().result().cloned().unwrap_or(serde_json::Value::Null))
            .collect()
    }

    pub fn collect_failures(&self) -> Vec<TaskFailure> {
        self.tasks
            .iter()
            .filter_map(|t| {
                let task = t.get();
                task.last_error().map(|error| TaskFailure {
                    task_id: task.id.clone(),
                    worker_id: task.prev_worker.clone(),
                    error: error.to_string(),
                })
            })
            .collect()
    }
}

impl JobRef {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        seq: u64,
        total_tasks: usize,
        tasks: Vec<TaskRef>,
        client: Option<Client>,
        priority: i32,
        checkpoint_interval: Option<f64>,
        deadline: Option<Instant>,
    ) -> Self {
        Self::wrap(Job {
            id,
            seq,
            status: JobStatus::Pending,
            total_tasks,
            tasks,
            client,
            priority,
            checkpoint_interval,
            deadline,
            created_at: Utc::now(),
        })
    }
}
