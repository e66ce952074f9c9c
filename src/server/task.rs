use std::fmt;
use std::time::Instant;

use serde_json::Value;

use crate::common::{JobId, TaskId, WorkerId, WrappedRcRefCell};

/// Lowest explicit priority band; submissions without a priority land here.
/// Priority 1 is the highest.
pub const DEFAULT_PRIORITY: i32 = 5;

pub fn task_id_for(job_id: &str, index: usize) -> TaskId {
    format!("{}_task_{}", job_id, index)
}

pub enum TaskRuntimeState {
    Pending,
    Assigned(WorkerId),
    Running(WorkerId),
    Finished(Value),
    Failed(String),
}

impl fmt::Debug for TaskRuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::Pending => 'P',
            Self::Assigned(_) => 'A',
            Self::Running(_) => 'R',
            Self::Finished(_) => 'F',
            Self::Failed(_) => 'E',
        };
        write!(f, "{}", n)
    }
}

#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    /// Position of the argument tuple in the submission; drives result order.
    pub index: usize,
    /// Submission order of the owning job, used by FIFO-style strategies.
    pub seq: u64,
    pub args: Value,
    pub priority: i32,
    pub comp_requirement: f64,
    pub mem_requirement: f64,
    pub state: TaskRuntimeState,
    pub attempts: u32,
    /// Worker that last held the task; reassignment prefers somebody else.
    pub prev_worker: Option<WorkerId>,
    pub assigned_at: Option<Instant>,
    pub checkpoint_count: u32,
    pub progress_percent: f64,
}

pub type TaskRef = WrappedRcRefCell<Task>;

impl Task {
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self.state, TaskRuntimeState::Pending)
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, TaskRuntimeState::Finished(_))
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self.state, TaskRuntimeState::Failed(_))
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.is_finished() || self.is_failed()
    }

    #[inline]
    pub fn assignee(&self) -> Option<&WorkerId> {
        match &self.state {
            TaskRuntimeState::Assigned(worker) | TaskRuntimeState::Running(worker) => Some(worker),
            _ => None,
        }
    }

    pub fn status_name(&self) -> &'static str {
        match &self.state {
            TaskRuntimeState::Pending => "pending",
            TaskRuntimeState::Assigned(_) => "assigned",
            TaskRuntimeState::Running(_) => "running",
            TaskRuntimeState::Finished(_) => "completed",
            TaskRuntimeState::Failed(_) => "failed",
        }
    }

    #[inline]
    pub fn result(&self) -> Option<&Value> {
        match &self.state {
            TaskRuntimeState::Finished(result) => Some(result),
            _ => None,
        }
    }

    #[inline]
    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            TaskRuntimeState::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl TaskRef {
    pub fn new(job_id: &str, index: usize, seq: u64, args: Value, priority: i32) -> Self {
        Self::wrap(Task {
            id: task_id_for(job_id, index),
            job_id: job_id.to_string(),
            index,
            seq,
            args,
            priority,
            comp_requirement: 1.0,
            mem_requirement: 0.0,
            state: TaskRuntimeState::Pending,
            attempts: 0,
            prev_worker: None,
            assigned_at: None,
            checkpoint_count: 0,
            progress_percent: 0.0,
        })
    }
}
