use std::time::Instant;

use crate::common::{JobId, Map, Set, TaskId, WorkerId, WrappedRcRefCell};
use crate::config::{ForemanConfig, SchedulerKind};
use crate::db::Database;
use crate::protocol::messages::FailureKind;
use crate::scheduler::protocol::{Assignment, TaskSnapshot, WorkerSnapshot};
use crate::scheduler::{create_scheduler, Scheduler};
use crate::server::job::JobRef;
use crate::server::task::TaskRef;
use crate::server::worker::WorkerRef;

/// The coordinator's single shared state: registries, the pending-task index,
/// the function-blob cache, the active scheduling strategy and the
/// authoritative store. All mutation happens under the owning `RefCell`
/// borrow, which realises the spec's registry/job lock pair on the
/// single-threaded runtime; borrows are never held across await points.
pub struct Core {
    jobs: Map<JobId, JobRef>,
    tasks: Map<TaskId, TaskRef>,
    workers: Map<WorkerId, WorkerRef>,
    /// Index into `tasks`: candidates for dispatch. Entries are validated
    /// (and stale ones dropped) each time a snapshot is taken.
    pending_tasks: Vec<TaskRef>,
    /// Function blobs cached per job, exactly as received (hex), so every
    /// `assign_task` can forward them verbatim. Evicted at job-terminal.
    func_cache: Map<JobId, String>,
    /// `None` only while a PSO run borrows the strategy on the blocking pool.
    scheduler: Option<Box<dyn Scheduler>>,
    db: Database,
    config: ForemanConfig,
    job_seq: u64,
    stopped: bool,
}

pub type CoreRef = WrappedRcRefCell<Core>;

impl Core {
    pub fn new(db: Database, config: ForemanConfig) -> Self {
        let scheduler = create_scheduler(config.scheduler);
        Self {
            jobs: Default::default(),
            tasks: Default::default(),
            workers: Default::default(),
            pending_tasks: Default::default(),
            func_cache: Default::default(),
            scheduler: Some(scheduler),
            db,
            config,
            job_seq: 0,
            stopped: false,
        }
    }

    #[inline]
    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    #[inline]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[inline]
    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn next_job_seq(&mut self) -> u64 {
        let seq = self.job_seq;
        self.job_seq += 1;
        seq
    }

    /// Mints a job id for submissions that did not bring one. Terminal job
    /// rows are retained indefinitely, so a candidate must be free in the
    /// store as well, not just in the working set.
    pub fn mint_job_id(&self) -> crate::Result<JobId> {
        loop {
            let candidate = format!("job_{:08x}", rand::random::<u32>());
            if self.jobs.contains_key(&candidate) {
                continue;
            }
            if self.db.query_job(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
    }

    pub fn add_job(&mut self, job_ref: JobRef) {
        let job_id = job_ref.get().id.clone();
        for task_ref in &job_ref.get().tasks {
            self.tasks
                .insert(task_ref.get().id.clone(), task_ref.clone());
            self.pending_tasks.push(task_ref.clone());
        }
        self.jobs.insert(job_id, job_ref);
    }

    /// Drops a finalized job from the working set. Store rows are retained;
    /// late queries are answered from the database.
    pub fn remove_job(&mut self, job_id: &str) {
        if let Some(job_ref) = self.jobs.remove(job_id) {
            for task_ref in &job_ref.get().tasks {
                self.tasks.remove(&task_ref.get().id);
            }
        }
        self.func_cache.remove(job_id);
    }

    #[inline]
    pub fn get_job(&self, job_id: &str) -> Option<&JobRef> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobRef> {
        self.jobs.values()
    }

    #[inline]
    pub fn get_task(&self, task_id: &str) -> Option<&TaskRef> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskRef> {
        self.tasks.values()
    }

    pub fn add_worker(&mut self, worker_ref: WorkerRef) -> Option<WorkerRef> {
        let worker_id = worker_ref.get().id.clone();
        self.workers.insert(worker_id, worker_ref)
    }

    #[inline]
    pub fn get_worker(&self, worker_id: &str) -> Option<&WorkerRef> {
        self.workers.get(worker_id)
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerRef> {
        self.workers.values()
    }

    pub fn mark_pending(&mut self, task_ref: TaskRef) {
        self.pending_tasks.push(task_ref);
    }

    pub fn cache_func_code(&mut self, job_id: &str, func_code: String) {
        self.func_cache.insert(job_id.to_string(), func_code);
    }

    #[inline]
    pub fn func_code(&self, job_id: &str) -> Option<&String> {
        self.func_cache.get(job_id)
    }

    pub fn evict_func_code(&mut self, job_id: &str) {
        self.func_cache.remove(job_id);
    }

    /// Builds the dispatcher's view: pending tasks in submission order and
    /// eligible workers sorted by id. Stale pending entries (tasks that moved
    /// on since they were indexed) are dropped here.
    pub fn snapshot_for_dispatch(&mut self) -> (Vec<TaskSnapshot>, Vec<WorkerSnapshot>, bool) {
        self.pending_tasks.retain(|t| t.get().is_pending());

        let mut seen: Set<TaskId> = Default::default();
        let now = Instant::now();
        let mut pending: Vec<TaskSnapshot> = Vec::with_capacity(self.pending_tasks.len());
        for task_ref in &self.pending_tasks {
            let task = task_ref.get();
            if !seen.insert(task.id.clone()) {
                continue;
            }
            let deadline_secs = self
                .jobs
                .get(&task.job_id)
                .and_then(|j| j.get().deadline)
                .map(|deadline| {
                    deadline
                        .saturating_duration_since(now)
                        .as_secs_f64()
                });
            pending.push(TaskSnapshot {
                id: task.id.clone(),
                job_id: task.job_id.clone(),
                index: task.index,
                priority: task.priority,
                attempts: task.attempts,
                seq: task.seq,
                comp_requirement: task.comp_requirement,
                mem_requirement: task.mem_requirement,
                prev_worker: task.prev_worker.clone(),
                deadline_secs,
            });
        }
        pending.sort_by_key(|t| (t.seq, t.index));

        let max_concurrent = self.config.max_concurrent_tasks;
        let mut workers: Vec<WorkerSnapshot> = self
            .workers
            .values()
            .filter(|w| w.get().is_idle(max_concurrent))
            .map(|w| w.get().make_snapshot(max_concurrent))
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));

        let offloaded = self
            .scheduler
            .as_ref()
            .map(|s| s.offloaded())
            .unwrap_or(false);
        (pending, workers, offloaded)
    }

    pub fn run_scheduler(
        &mut self,
        pending: &[TaskSnapshot],
        workers: &[WorkerSnapshot],
    ) -> Vec<Assignment> {
        match self.scheduler.as_mut() {
            Some(scheduler) => scheduler.select(pending, workers),
            None => Vec::new(),
        }
    }

    pub fn scheduler_on_failure(&mut self, worker: &WorkerId, task: &TaskId, cause: FailureKind) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.on_failure(worker, task, cause);
        }
    }

    pub fn scheduler_name(&self) -> &'static str {
        self.scheduler
            .as_ref()
            .map(|s| s.name())
            .unwrap_or("pso")
    }

    pub fn set_scheduler(&mut self, kind: SchedulerKind) {
        log::info!(
            "Scheduler changed from {} to {}",
            self.scheduler_name(),
            kind.name()
        );
        self.scheduler = Some(create_scheduler(kind));
    }

    /// Lends the strategy out for an offloaded run; `None` while a run is in
    /// flight, which makes concurrent dispatch rounds a no-op.
    pub fn take_scheduler(&mut self) -> Option<Box<dyn Scheduler>> {
        self.scheduler.take()
    }

    pub fn restore_scheduler(&mut self, scheduler: Box<dyn Scheduler>) {
        // A runtime toggle may have installed a replacement while the run
        // was in flight; the toggle wins.
        if self.scheduler.is_none() {
            self.scheduler = Some(scheduler);
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stops accepting work and returns every non-terminal job to the store
    /// marked cancelled.
    pub fn graceful_shutdown(&mut self) -> crate::Result<usize> {
        self.stopped = true;
        for job_ref in self.jobs.values() {
            let mut job = job_ref.get_mut();
            if !job.status.is_terminal() {
                job.status = crate::server::job::JobStatus::Cancelled;
            }
        }
        let cancelled = self.db.cancel_active_jobs()?;
        if cancelled > 0 {
            log::info!("Marked {} unfinished job(s) as cancelled", cancelled);
        }
        Ok(cancelled)
    }
}

impl CoreRef {
    pub fn new(db: Database, config: ForemanConfig) -> Self {
        Self::wrap(Core::new(db, config))
    }
}
