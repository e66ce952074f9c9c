use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::protocol::messages::{DeviceSpecs, FailureKind};

/// Embedded relational store holding the authoritative job/task/worker state.
/// All writes happen synchronously inside the handler that owns the core
/// borrow, so a reader of the store after a handler returns observes a state
/// consistent with the in-memory view.
pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub priority: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub job_id: String,
    pub task_index: i64,
    pub status: String,
    pub worker_id: Option<String>,
    pub args: Option<String>,
    pub priority: i64,
    pub attempts: i64,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub assigned_at: Option<String>,
    pub completed_at: Option<String>,
    pub checkpoint_count: i64,
    pub progress_percent: f64,
}

#[derive(Debug, Clone)]
pub struct WorkerRow {
    pub id: String,
    pub status: String,
    pub current_task_id: Option<String>,
    pub reliability: f64,
    pub tasks_completed: i64,
    pub tasks_failed: i64,
    pub total_exec_ms: i64,
    pub last_seen: String,
}

#[derive(Debug, Clone)]
pub struct WorkerFailureRow {
    pub worker_id: String,
    pub task_id: String,
    pub job_id: String,
    pub cause: String,
    pub message: String,
    pub failed_at: String,
}

/// Aggregated view served to monitoring consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub total_failures: i64,
}

pub struct NewJob<'a> {
    pub id: &'a str,
    pub total_tasks: usize,
    pub priority: i32,
    pub checkpoint_interval: Option<f64>,
    pub deadline: Option<String>,
    pub seq: u64,
}

pub struct NewTask<'a> {
    pub id: &'a str,
    pub index: usize,
    pub args: &'a str,
    pub priority: i32,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    total_tasks INTEGER NOT NULL,
    completed_tasks INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 5,
    checkpoint_interval REAL,
    deadline TEXT,
    seq INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    task_index INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    worker_id TEXT,
    args TEXT,
    priority INTEGER NOT NULL DEFAULT 5,
    attempts INTEGER NOT NULL DEFAULT 0,
    result TEXT,
    error_message TEXT,
    assigned_at TEXT,
    completed_at TEXT,
    checkpoint_count INTEGER NOT NULL DEFAULT 0,
    progress_percent REAL NOT NULL DEFAULT 0.0,
    checkpoint_data BLOB,
    last_checkpoint_id TEXT,
    last_checkpoint_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks(job_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'idle',
    current_task_id TEXT,
    cpu_frequency_ghz REAL NOT NULL DEFAULT 1.0,
    num_cores INTEGER NOT NULL DEFAULT 1,
    memory_gb REAL NOT NULL DEFAULT 4.0,
    battery_level REAL NOT NULL DEFAULT 100.0,
    signal_strength INTEGER NOT NULL DEFAULT 5,
    platform TEXT NOT NULL DEFAULT '',
    device_type TEXT NOT NULL DEFAULT '',
    reliability REAL NOT NULL DEFAULT 1.0,
    tasks_completed INTEGER NOT NULL DEFAULT 0,
    tasks_failed INTEGER NOT NULL DEFAULT 0,
    total_exec_ms INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS worker_failures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    cause TEXT NOT NULL,
    message TEXT NOT NULL,
    failed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_failures_worker ON worker_failures(worker_id);
";

fn now_utc() -> String {
    Utc::now().to_rfc3339()
}

impl Database {
    pub fn open(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> crate::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Creates the job record and all of its child tasks in one transaction.
    pub fn create_job_with_tasks(&mut self, job: &NewJob, tasks: &[NewTask]) -> crate::Result<()> {
        let created = now_utc();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, status, total_tasks, priority, checkpoint_interval, deadline, seq, created_at)
             VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id,
                job.total_tasks as i64,
                job.priority,
                job.checkpoint_interval,
                job.deadline,
                job.seq as i64,
                created,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tasks (id, job_id, task_index, args, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for task in tasks {
                stmt.execute(params![
                    task.id,
                    job.id,
                    task.index as i64,
                    task.args,
                    task.priority,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        completed_tasks: Option<i64>,
        error: Option<&str>,
    ) -> crate::Result<()> {
        let completed_at = match status {
            "completed" | "failed" | "cancelled" => Some(now_utc()),
            _ => None,
        };
        self.conn.execute(
            "UPDATE jobs SET status = ?2,
                 completed_tasks = COALESCE(?3, completed_tasks),
                 error_message = COALESCE(?4, error_message),
                 completed_at = COALESCE(?5, completed_at)
             WHERE id = ?1",
            params![job_id, status, completed_tasks, error, completed_at],
        )?;
        Ok(())
    }

    /// Single entry point for task transitions. An `assigned` transition
    /// stamps `assigned_at` and counts the attempt; terminal transitions
    /// stamp `completed_at`; a `pending` transition clears the assignee.
    pub fn update_task_status(
        &self,
        task_id: &str,
        status: &str,
        worker_id: Option<&str>,
        result: Option<&str>,
        error: Option<&str>,
    ) -> crate::Result<()> {
        match status {
            "assigned" => {
                self.conn.execute(
                    "UPDATE tasks SET status = 'assigned', worker_id = ?2,
                         attempts = attempts + 1, assigned_at = ?3
                     WHERE id = ?1",
                    params![task_id, worker_id, now_utc()],
                )?;
            }
            "pending" => {
                self.conn.execute(
                    "UPDATE tasks SET status = 'pending', worker_id = NULL,
                         error_message = COALESCE(?2, error_message)
                     WHERE id = ?1",
                    params![task_id, error],
                )?;
            }
            "completed" | "failed" => {
                self.conn.execute(
                    "UPDATE tasks SET status = ?2,
                         result = COALESCE(?3, result),
                         error_message = COALESCE(?4, error_message),
                         completed_at = ?5
                     WHERE id = ?1",
                    params![task_id, status, result, error, now_utc()],
                )?;
            }
            other => {
                self.conn.execute(
                    "UPDATE tasks SET status = ?2 WHERE id = ?1",
                    params![task_id, other],
                )?;
            }
        }
        Ok(())
    }

    pub fn record_task_checkpoint(
        &self,
        task_id: &str,
        checkpoint_id: &str,
        data: &[u8],
        progress_percent: f64,
    ) -> crate::Result<()> {
        self.conn.execute(
            "UPDATE tasks SET checkpoint_count = checkpoint_count + 1,
                 progress_percent = ?3,
                 checkpoint_data = ?4,
                 last_checkpoint_id = ?2,
                 last_checkpoint_at = ?5,
                 status = CASE WHEN status = 'assigned' THEN 'running' ELSE status END
             WHERE id = ?1",
            params![task_id, checkpoint_id, progress_percent, data, now_utc()],
        )?;
        Ok(())
    }

    /// Registers a worker, preserving its historical statistics if the id is
    /// already known. Device specs are refreshed on every registration.
    pub fn upsert_worker(&self, worker_id: &str, specs: &DeviceSpecs) -> crate::Result<()> {
        let now = now_utc();
        self.conn.execute(
            "INSERT INTO workers (id, status, cpu_frequency_ghz, num_cores, memory_gb,
                                  battery_level, signal_strength, platform, device_type,
                                  first_seen, last_seen)
             VALUES (?1, 'idle', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 status = 'idle',
                 current_task_id = NULL,
                 cpu_frequency_ghz = excluded.cpu_frequency_ghz,
                 num_cores = excluded.num_cores,
                 memory_gb = excluded.memory_gb,
                 battery_level = excluded.battery_level,
                 signal_strength = excluded.signal_strength,
                 platform = excluded.platform,
                 device_type = excluded.device_type,
                 last_seen = excluded.last_seen",
            params![
                worker_id,
                specs.cpu_frequency_ghz,
                specs.num_cores,
                specs.memory_gb,
                specs.battery_level,
                specs.signal_strength,
                specs.platform,
                specs.device_type,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn update_worker_status(
        &self,
        worker_id: &str,
        status: &str,
        current_task: Option<&str>,
    ) -> crate::Result<()> {
        self.conn.execute(
            "UPDATE workers SET status = ?2, current_task_id = ?3, last_seen = ?4 WHERE id = ?1",
            params![worker_id, status, current_task, now_utc()],
        )?;
        Ok(())
    }

    pub fn touch_worker(&self, worker_id: &str) -> crate::Result<()> {
        self.conn.execute(
            "UPDATE workers SET last_seen = ?2 WHERE id = ?1",
            params![worker_id, now_utc()],
        )?;
        Ok(())
    }

    pub fn update_worker_stats(
        &self,
        worker_id: &str,
        completed: bool,
        exec_ms: u64,
        reliability: f64,
    ) -> crate::Result<()> {
        if completed {
            self.conn.execute(
                "UPDATE workers SET tasks_completed = tasks_completed + 1,
                     total_exec_ms = total_exec_ms + ?2, reliability = ?3
                 WHERE id = ?1",
                params![worker_id, exec_ms as i64, reliability],
            )?;
        } else {
            self.conn.execute(
                "UPDATE workers SET tasks_failed = tasks_failed + 1, reliability = ?2
                 WHERE id = ?1",
                params![worker_id, reliability],
            )?;
        }
        Ok(())
    }

    pub fn record_worker_failure(
        &self,
        worker_id: &str,
        task_id: &str,
        job_id: &str,
        cause: FailureKind,
        message: &str,
    ) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO worker_failures (worker_id, task_id, job_id, cause, message, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![worker_id, task_id, job_id, cause.as_str(), message, now_utc()],
        )?;
        Ok(())
    }

    pub fn query_job(&self, job_id: &str) -> crate::Result<Option<JobRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, total_tasks, completed_tasks, priority,
                        created_at, completed_at, error_message
                 FROM jobs WHERE id = ?1",
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn query_tasks_by_job(&self, job_id: &str) -> crate::Result<Vec<TaskRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, task_index, status, worker_id, args, priority, attempts,
                    result, error_message, assigned_at, completed_at,
                    checkpoint_count, progress_percent
             FROM tasks WHERE job_id = ?1 ORDER BY task_index ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Pending tasks in scheduling order: explicit priority first (1 is the
    /// highest), then job submission order, then the task's insertion index.
    pub fn query_pending_tasks(&self, limit: usize) -> crate::Result<Vec<TaskRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.job_id, t.task_index, t.status, t.worker_id, t.args, t.priority,
                    t.attempts, t.result, t.error_message, t.assigned_at, t.completed_at,
                    t.checkpoint_count, t.progress_percent
             FROM tasks t JOIN jobs j ON t.job_id = j.id
             WHERE t.status = 'pending'
             ORDER BY t.priority ASC, j.seq ASC, t.task_index ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn query_worker(&self, worker_id: &str) -> crate::Result<Option<WorkerRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, current_task_id, reliability, tasks_completed,
                        tasks_failed, total_exec_ms, last_seen
                 FROM workers WHERE id = ?1",
                params![worker_id],
                worker_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn query_worker_failures(&self, worker_id: &str) -> crate::Result<Vec<WorkerFailureRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT worker_id, task_id, job_id, cause, message, failed_at
             FROM worker_failures WHERE worker_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![worker_id], |row| {
                Ok(WorkerFailureRow {
                    worker_id: row.get(0)?,
                    task_id: row.get(1)?,
                    job_id: row.get(2)?,
                    cause: row.get(3)?,
                    message: row.get(4)?,
                    failed_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every failed attempt recorded against a job, oldest first. This is
    /// the failure list a `job_error` reply carries.
    pub fn query_job_failures(&self, job_id: &str) -> crate::Result<Vec<WorkerFailureRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT worker_id, task_id, job_id, cause, message, failed_at
             FROM worker_failures WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok(WorkerFailureRow {
                    worker_id: row.get(0)?,
                    task_id: row.get(1)?,
                    job_id: row.get(2)?,
                    cause: row.get(3)?,
                    message: row.get(4)?,
                    failed_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn job_stats(&self) -> crate::Result<StoreStats> {
        let (total_jobs, completed_jobs, failed_jobs) = self.conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN status = 'completed' THEN 1 END),
                    COUNT(CASE WHEN status = 'failed' THEN 1 END)
             FROM jobs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let (total_tasks, completed_tasks) = self.conn.query_row(
            "SELECT COUNT(*), COUNT(CASE WHEN status = 'completed' THEN 1 END) FROM tasks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total_failures =
            self.conn
                .query_row("SELECT COUNT(*) FROM worker_failures", [], |row| row.get(0))?;
        Ok(StoreStats {
            total_jobs,
            completed_jobs,
            failed_jobs,
            total_tasks,
            completed_tasks,
            total_failures,
        })
    }

    /// Marks every job that has not reached a terminal state as cancelled.
    /// Used by graceful shutdown.
    pub fn cancel_active_jobs(&self) -> crate::Result<usize> {
        let changed = self.conn.execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?1
             WHERE status IN ('pending', 'running')",
            params![now_utc()],
        )?;
        Ok(changed)
    }
}

fn job_from_row(row: &Row) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        status: row.get(1)?,
        total_tasks: row.get(2)?,
        completed_tasks: row.get(3)?,
        priority: row.get(4)?,
        created_at: row.get(5)?,
        completed_at: row.get(6)?,
        error_message: row.get(7)?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        task_index: row.get(2)?,
        status: row.get(3)?,
        worker_id: row.get(4)?,
        args: row.get(5)?,
        priority: row.get(6)?,
        attempts: row.get(7)?,
        result: row.get(8)?,
        error_message: row.get(9)?,
        assigned_at: row.get(10)?,
        completed_at: row.get(11)?,
        checkpoint_count: row.get(12)?,
        progress_percent: row.get(13)?,
    })
}

fn worker_from_row(row: &Row) -> rusqlite::Result<WorkerRow> {
    Ok(WorkerRow {
        id: row.get(0)?,
        status: row.get(1)?,
        current_task_id: row.get(2)?,
        reliability: row.get(3)?,
        tasks_completed: row.get(4)?,
        tasks_failed: row.get(5)?,
        total_exec_ms: row.get(6)?,
        last_seen: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_job(tasks: usize) -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let fields: Vec<(String, String)> = (0..tasks)
            .map(|i| (format!("j1_task_{}", i), format!("[{}]", i)))
            .collect();
        let new_tasks: Vec<NewTask> = fields
            .iter()
            .enumerate()
            .map(|(i, (id, args))| NewTask {
                id,
                index: i,
                args,
                priority: 5,
            })
            .collect();
        db.create_job_with_tasks(
            &NewJob {
                id: "j1",
                total_tasks: tasks,
                priority: 5,
                checkpoint_interval: None,
                deadline: None,
                seq: 0,
            },
            &new_tasks,
        )
        .unwrap();
        db
    }

    #[test]
    fn job_and_tasks_created_in_one_call() {
        let db = store_with_job(3);
        let job = db.query_job("j1").unwrap().unwrap();
        assert_eq!(job.status, "pending");
        assert_eq!(job.total_tasks, 3);

        let tasks = db.query_tasks_by_job("j1").unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].task_index, 0);
        assert_eq!(tasks[2].id, "j1_task_2");
        assert!(tasks.iter().all(|t| t.status == "pending"));
    }

    #[test]
    fn assignment_counts_attempts_and_stamps_time() {
        let db = store_with_job(1);
        db.update_task_status("j1_task_0", "assigned", Some("w0"), None, None)
            .unwrap();
        db.update_task_status("j1_task_0", "pending", None, None, Some("boom"))
            .unwrap();
        db.update_task_status("j1_task_0", "assigned", Some("w1"), None, None)
            .unwrap();

        let task = &db.query_tasks_by_job("j1").unwrap()[0];
        assert_eq!(task.attempts, 2);
        assert_eq!(task.worker_id.as_deref(), Some("w1"));
        assert!(task.assigned_at.is_some());
        assert_eq!(task.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn pending_tasks_ordered_by_priority_then_insertion() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_job_with_tasks(
            &NewJob {
                id: "a",
                total_tasks: 2,
                priority: 5,
                checkpoint_interval: None,
                deadline: None,
                seq: 0,
            },
            &[
                NewTask {
                    id: "a_task_0",
                    index: 0,
                    args: "[]",
                    priority: 5,
                },
                NewTask {
                    id: "a_task_1",
                    index: 1,
                    args: "[]",
                    priority: 5,
                },
            ],
        )
        .unwrap();
        db.create_job_with_tasks(
            &NewJob {
                id: "b",
                total_tasks: 1,
                priority: 1,
                checkpoint_interval: None,
                deadline: None,
                seq: 1,
            },
            &[NewTask {
                id: "b_task_0",
                index: 0,
                args: "[]",
                priority: 1,
            }],
        )
        .unwrap();

        let pending = db.query_pending_tasks(10).unwrap();
        let ids: Vec<&str> = pending.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b_task_0", "a_task_0", "a_task_1"]);
    }

    #[test]
    fn worker_upsert_preserves_stats() {
        let db = store_with_job(1);
        db.upsert_worker("w0", &DeviceSpecs::default()).unwrap();
        db.update_worker_stats("w0", true, 120, 1.0).unwrap();
        db.update_worker_status("w0", "gone", None).unwrap();

        // Re-registration must not reset the completion counters.
        db.upsert_worker("w0", &DeviceSpecs::default()).unwrap();
        let worker = db.query_worker("w0").unwrap().unwrap();
        assert_eq!(worker.tasks_completed, 1);
        assert_eq!(worker.status, "idle");
    }

    #[test]
    fn failure_log_is_append_only() {
        let db = store_with_job(1);
        db.upsert_worker("w0", &DeviceSpecs::default()).unwrap();
        db.record_worker_failure("w0", "j1_task_0", "j1", FailureKind::TaskError, "div by zero")
            .unwrap();
        db.record_worker_failure("w0", "j1_task_0", "j1", FailureKind::Disconnect, "gone")
            .unwrap();

        let failures = db.query_worker_failures("w0").unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].cause, "task_error");
        assert_eq!(failures[1].cause, "disconnect");
    }

    #[test]
    fn stats_aggregate_by_status() {
        let db = store_with_job(2);
        db.update_task_status("j1_task_0", "completed", None, Some("1"), None)
            .unwrap();
        db.update_job_status("j1", "completed", Some(2), None).unwrap();

        let stats = db.job_stats().unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
    }

    #[test]
    fn shutdown_cancels_active_jobs_only() {
        let db = store_with_job(1);
        db.update_job_status("j1", "running", None, None).unwrap();
        assert_eq!(db.cancel_active_jobs().unwrap(), 1);
        assert_eq!(db.query_job("j1").unwrap().unwrap().status, "cancelled");
        // Idempotent: nothing left to cancel.
        assert_eq!(db.cancel_active_jobs().unwrap(), 0);
    }
}
