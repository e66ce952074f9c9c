use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::common::{JobId, WorkerId};
use crate::db::{NewJob, NewTask};
use crate::protocol::messages::{
    CheckpointAckData, CheckpointAckMsg, ErrorKind, ErrorMsg, FailureKind, JobErrorData,
    JobErrorMsg, JobStatusData, JobStatusMsg, RegisterWorkerMsg, SchedulerChangedData,
    SubmitJobMsg, TaskCheckpointMsg, TaskErrorData, TaskFailure, TaskResultData,
    TaskStatusCounts, ToClientMessage, ToWorkerMessage,
};
use crate::protocol::messages::{JobResultData, JobResultMsg};
use crate::server::client::Client;
use crate::server::completion::check_job_completion;
use crate::server::core::Core;
use crate::server::job::{JobRef, JobStatus};
use crate::server::notifications::Notifications;
use crate::server::task::{TaskRef, TaskRuntimeState, DEFAULT_PRIORITY};
use crate::server::worker::WorkerRef;

/// Creates the job record and all child tasks from a submission, persists
/// them in one transaction, caches the function blob and binds the submitting
/// connection as the job's client. Returns the accepted job id, or `None` if
/// the submission was rejected (the client got a `job_error` either way).
pub fn on_submit_job(
    core: &mut Core,
    notifications: &mut Notifications,
    message: SubmitJobMsg,
    sender: UnboundedSender<Bytes>,
) -> crate::Result<Option<JobId>> {
    let SubmitJobMsg { job_id, data } = message;
    let job_id = match job_id {
        Some(job_id) => job_id,
        None => core.mint_job_id()?,
    };
    let client = Client::new(job_id.clone(), sender);

    if data.total_tasks != data.args_list.len() {
        let reason = format!(
            "total_tasks is {} but args_list has {} entries",
            data.total_tasks,
            data.args_list.len()
        );
        log::warn!("Rejecting job {}: {}", job_id, reason);
        reject_submission(notifications, &client, &job_id, &reason);
        return Ok(None);
    }
    if core.get_job(&job_id).is_some() || core.db().query_job(&job_id)?.is_some() {
        let reason = format!("job id {} already exists", job_id);
        log::warn!("Rejecting submission: {}", reason);
        reject_submission(notifications, &client, &job_id, &reason);
        return Ok(None);
    }

    let seq = core.next_job_seq();
    let priority = data.priority.unwrap_or(DEFAULT_PRIORITY);
    let deadline = data
        .deadline_secs
        .filter(|secs| *secs > 0.0)
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    let deadline_utc = data
        .deadline_secs
        .filter(|secs| *secs > 0.0)
        .map(|secs| (chrono::Utc::now() + chrono::Duration::milliseconds((secs * 1000.0) as i64)).to_rfc3339());

    let tasks: Vec<TaskRef> = data
        .args_list
        .iter()
        .enumerate()
        .map(|(index, args)| TaskRef::new(&job_id, index, seq, args.clone(), priority))
        .collect();

    log::info!("Creating job {} with {} task(s)", job_id, tasks.len());
    {
        let task_ids: Vec<String> = tasks.iter().map(|t| t.get().id.clone()).collect();
        let task_args: Vec<String> = tasks
            .iter()
            .map(|t| serde_json::to_string(&t.get().args))
            .collect::<Result<_, _>>()?;
        let new_tasks: Vec<NewTask> = task_ids
            .iter()
            .zip(task_args.iter())
            .enumerate()
            .map(|(index, (id, args))| NewTask {
                id,
                index,
                args,
                priority,
            })
            .collect();
        core.db_mut().create_job_with_tasks(
            &NewJob {
                id: &job_id,
                total_tasks: data.total_tasks,
                priority,
                checkpoint_interval: data.checkpoint_interval,
                deadline: deadline_utc,
                seq,
            },
            &new_tasks,
        )?;
    }

    core.cache_func_code(&job_id, data.func_code);

    let job_ref = JobRef::new(
        job_id.clone(),
        seq,
        data.total_tasks,
        tasks,
        Some(client),
        priority,
        data.checkpoint_interval,
        deadline,
    );
    if data.total_tasks > 0 {
        job_ref.get_mut().status = JobStatus::Running;
        core.db().update_job_status(&job_id, "running", None, None)?;
    }
    core.add_job(job_ref.clone());

    if let Some(client) = job_ref.get().client.as_ref() {
        notifications.queue_client_message(
            client,
            ToClientMessage::JobAccepted {
                job_id: job_id.clone(),
            },
        );
    }

    // A job with no tasks completes on the spot with an empty result vector.
    check_job_completion(core, notifications, &job_ref)?;
    notifications.wake_dispatcher();
    Ok(Some(job_id))
}

fn reject_submission(
    notifications: &mut Notifications,
    client: &Client,
    job_id: &str,
    reason: &str,
) {
    notifications.queue_client_message(
        client,
        ToClientMessage::JobError(JobErrorMsg {
            job_id: job_id.to_string(),
            data: JobErrorData {
                error: reason.to_string(),
                failures: Vec::new(),
            },
        }),
    );
}

/// Binds a worker id to a connection. A duplicate id closes the older
/// connection (its tasks are reverted) while the worker's persistent
/// statistics survive the re-registration.
pub fn on_register_worker(
    core: &mut Core,
    notifications: &mut Notifications,
    message: RegisterWorkerMsg,
    sender: UnboundedSender<Bytes>,
) -> crate::Result<WorkerRef> {
    let RegisterWorkerMsg { worker_id, data } = message;
    let specs = data.specs.unwrap_or_default();

    if let Some(previous) = core.get_worker(&worker_id).cloned() {
        if previous.get().alive {
            log::warn!(
                "Worker id {} re-registered; closing the older connection",
                worker_id
            );
            let _ = previous.get().send_message(&ToWorkerMessage::Disconnect);
            drop_worker_tasks(core, notifications, &previous, FailureKind::Disconnect)?;
            let mut previous = previous.get_mut();
            previous.alive = false;
            previous.close_channel();
        }
    }

    let worker_ref = WorkerRef::new(worker_id.clone(), specs.clone(), sender);
    // A worker reconnecting after a foreman restart gets its history back
    // from the store.
    if let Some(row) = core.db().query_worker(&worker_id)? {
        let mut worker = worker_ref.get_mut();
        worker.reliability = row.reliability;
        worker.tasks_completed = row.tasks_completed.max(0) as u64;
        worker.tasks_failed = row.tasks_failed.max(0) as u64;
        worker.total_exec_ms = row.total_exec_ms.max(0) as u64;
    }
    core.db().upsert_worker(&worker_id, &specs)?;
    core.add_worker(worker_ref.clone());

    log::info!("Worker {} registered", worker_id);
    notifications.wake_dispatcher();
    Ok(worker_ref)
}

/// `worker_ready` only matters when the worker genuinely has no live
/// assignment; otherwise it is ignored.
pub fn on_worker_ready(
    core: &mut Core,
    notifications: &mut Notifications,
    worker_id: &WorkerId,
) -> crate::Result<()> {
    if let Some(worker_ref) = core.get_worker(worker_id) {
        let worker = worker_ref.get();
        if worker.alive && worker.active_tasks.is_empty() {
            core.db().update_worker_status(worker_id, "idle", None)?;
            notifications.wake_dispatcher();
        }
    }
    Ok(())
}

pub fn on_task_result(
    core: &mut Core,
    notifications: &mut Notifications,
    worker_id: &WorkerId,
    data: TaskResultData,
) -> crate::Result<()> {
    let TaskResultData { task_id, result } = data;
    let task_ref = match core.get_task(&task_id).cloned() {
        Some(task_ref) => task_ref,
        None => {
            log::debug!(
                "Result for unknown task {} from worker {}; ignored",
                task_id,
                worker_id
            );
            return Ok(());
        }
    };

    {
        let task = task_ref.get();
        if task.is_terminal() {
            log::debug!("Replayed result for finished task {}; ignored", task_id);
            return Ok(());
        }
        if task.assignee() != Some(worker_id) {
            log::warn!(
                "Worker {} reported a result for task {} it does not hold",
                worker_id,
                task_id
            );
            core.db().record_worker_failure(
                worker_id,
                &task_id,
                &task.job_id,
                FailureKind::Reject,
                "result for a task assigned elsewhere",
            )?;
            return Ok(());
        }
    }

    let job_id = task_ref.get().job_id.clone();
    let exec_ms = task_ref
        .get()
        .assigned_at
        .map(|at| at.elapsed().as_millis() as u64)
        .unwrap_or(0);

    {
        let result_json = serde_json::to_string(&result)?;
        let mut task = task_ref.get_mut();
        task.prev_worker = Some(worker_id.clone());
        task.state = TaskRuntimeState::Finished(result);
        task.progress_percent = 100.0;
        core.db().update_task_status(
            &task.id,
            "completed",
            Some(worker_id.as_str()),
            Some(&result_json),
            None,
        )?;
    }
    log::debug!(
        "Task {} completed by worker {} in {} ms",
        task_id,
        worker_id,
        exec_ms
    );

    release_worker_slot(core, worker_id, &task_id, true, exec_ms)?;

    if let Some(job_ref) = core.get_job(&job_id).cloned() {
        check_job_completion(core, notifications, &job_ref)?;
    }
    notifications.wake_dispatcher();
    Ok(())
}

pub fn on_task_error(
    core: &mut Core,
    notifications: &mut Notifications,
    worker_id: &WorkerId,
    data: TaskErrorData,
) -> crate::Result<()> {
    let TaskErrorData { task_id, error } = data;
    let task_ref = match core.get_task(&task_id).cloned() {
        Some(task_ref) => task_ref,
        None => {
            log::debug!(
                "Error report for unknown task {} from worker {}; ignored",
                task_id,
                worker_id
            );
            return Ok(());
        }
    };

    {
        let task = task_ref.get();
        if task.is_terminal() {
            log::debug!("Error report for finished task {}; ignored", task_id);
            return Ok(());
        }
        if task.assignee() != Some(worker_id) {
            log::warn!(
                "Worker {} reported an error for task {} it does not hold",
                worker_id,
                task_id
            );
            core.db().record_worker_failure(
                worker_id,
                &task_id,
                &task.job_id,
                FailureKind::Reject,
                "error for a task assigned elsewhere",
            )?;
            return Ok(());
        }
    }

    let job_id = task_ref.get().job_id.clone();
    log::info!(
        "Task {} failed on worker {}: {}",
        task_id,
        worker_id,
        error
    );
    core.db()
        .record_worker_failure(worker_id, &task_id, &job_id, FailureKind::TaskError, &error)?;
    core.scheduler_on_failure(worker_id, &task_id, FailureKind::TaskError);

    release_worker_slot(core, worker_id, &task_id, false, 0)?;

    let max_attempts = core.config().max_attempts;
    let exhausted = task_ref.get().attempts >= max_attempts;
    {
        let mut task = task_ref.get_mut();
        task.prev_worker = Some(worker_id.clone());
        task.assigned_at = None;
        if exhausted {
            core.db()
                .update_task_status(&task.id, "failed", None, None, Some(error.as_str()))?;
            task.state = TaskRuntimeState::Failed(error);
        } else {
            // Back to pending so another worker can pick it up.
            core.db()
                .update_task_status(&task.id, "pending", None, None, Some(error.as_str()))?;
            task.state = TaskRuntimeState::Pending;
        }
    }

    if exhausted {
        if let Some(job_ref) = core.get_job(&job_id).cloned() {
            check_job_completion(core, notifications, &job_ref)?;
        }
    } else {
        core.mark_pending(task_ref);
    }
    notifications.wake_dispatcher();
    Ok(())
}

pub fn on_heartbeat(core: &mut Core, worker_id: &WorkerId) -> crate::Result<()> {
    if let Some(worker_ref) = core.get_worker(worker_id) {
        worker_ref.get_mut().last_heartbeat = Instant::now();
        core.db().touch_worker(worker_id)?;
    }
    Ok(())
}

/// Stores checkpoint bookkeeping for a task and acknowledges it. The
/// checkpoint payload itself is opaque; the first checkpoint also moves the
/// task from `assigned` to `running`.
pub fn on_task_checkpoint(
    core: &mut Core,
    notifications: &mut Notifications,
    worker_id: &WorkerId,
    message: TaskCheckpointMsg,
) -> crate::Result<()> {
    let data = message.data;
    let task_ref = match core.get_task(&data.task_id).cloned() {
        Some(task_ref) => task_ref,
        None => {
            log::debug!("Checkpoint for unknown task {}; ignored", data.task_id);
            return Ok(());
        }
    };
    if task_ref.get().assignee() != Some(worker_id) {
        log::debug!(
            "Checkpoint for task {} from non-assignee {}; ignored",
            data.task_id,
            worker_id
        );
        return Ok(());
    }

    let payload = match hex::decode(&data.data_hex) {
        Ok(payload) => payload,
        Err(_) => {
            notifications.queue_worker_message(
                worker_id,
                ToWorkerMessage::Error(ErrorMsg::new(
                    ErrorKind::BadMessage,
                    "checkpoint payload is not valid hex",
                )),
            );
            return Ok(());
        }
    };

    let job_id = task_ref.get().job_id.clone();
    {
        let mut task = task_ref.get_mut();
        task.checkpoint_count += 1;
        task.progress_percent = data.progress_percent;
        if let TaskRuntimeState::Assigned(worker) = &task.state {
            task.state = TaskRuntimeState::Running(worker.clone());
        }
        core.db().record_task_checkpoint(
            &task.id,
            &data.checkpoint_id,
            &payload,
            data.progress_percent,
        )?;
    }
    log::debug!(
        "Stored checkpoint {} for task {} ({} bytes, {:.1}%)",
        data.checkpoint_id,
        data.task_id,
        payload.len(),
        data.progress_percent
    );

    notifications.queue_worker_message(
        worker_id,
        ToWorkerMessage::CheckpointAck(CheckpointAckMsg {
            job_id,
            data: CheckpointAckData {
                task_id: data.task_id,
                checkpoint_id: data.checkpoint_id,
            },
        }),
    );
    Ok(())
}

/// Connection-loss path shared by clean `disconnect`, EOF, send failures and
/// heartbeat timeouts: the worker goes `gone` and every task it held returns
/// to `pending` with a failure record.
pub fn on_worker_lost(
    core: &mut Core,
    notifications: &mut Notifications,
    worker_id: &WorkerId,
    cause: FailureKind,
) -> crate::Result<()> {
    let worker_ref = match core.get_worker(worker_id).cloned() {
        Some(worker_ref) => worker_ref,
        None => return Ok(()),
    };
    if !worker_ref.get().alive {
        return Ok(());
    }

    log::info!("Worker {} lost ({})", worker_id, cause.as_str());
    worker_ref.get_mut().alive = false;
    core.db().update_worker_status(worker_id, "gone", None)?;
    drop_worker_tasks(core, notifications, &worker_ref, cause)?;
    Ok(())
}

fn drop_worker_tasks(
    core: &mut Core,
    notifications: &mut Notifications,
    worker_ref: &WorkerRef,
    cause: FailureKind,
) -> crate::Result<()> {
    let task_ids: Vec<_> = worker_ref.get().active_tasks.iter().cloned().collect();
    worker_ref.get_mut().active_tasks.clear();
    for task_id in task_ids {
        if let Some(task_ref) = core.get_task(&task_id).cloned() {
            revert_task_to_pending(core, notifications, &task_ref, cause, "worker lost")?;
        }
    }
    if !notifications.dispatcher_wake {
        notifications.wake_dispatcher();
    }
    Ok(())
}

/// Returns an `assigned`/`running` task to `pending`, records the failure and
/// notifies the strategy. Used by the disconnect path and the supervisor's
/// stale-task sweep. A task already at its attempt budget fails permanently
/// instead, keeping `attempts <= max_attempts` for every terminal task.
pub fn revert_task_to_pending(
    core: &mut Core,
    notifications: &mut Notifications,
    task_ref: &TaskRef,
    cause: FailureKind,
    message: &str,
) -> crate::Result<()> {
    let (task_id, job_id, worker_id) = {
        let task = task_ref.get();
        match task.assignee().cloned() {
            Some(worker_id) => (task.id.clone(), task.job_id.clone(), worker_id),
            None => return Ok(()),
        }
    };

    core.db()
        .record_worker_failure(&worker_id, &task_id, &job_id, cause, message)?;
    core.scheduler_on_failure(&worker_id, &task_id, cause);

    if let Some(worker_ref) = core.get_worker(&worker_id) {
        worker_ref.get_mut().active_tasks.remove(&task_id);
        worker_ref.get_mut().record_failure();
        let reliability = worker_ref.get().reliability;
        core.db().update_worker_stats(&worker_id, false, 0, reliability)?;
    }

    let exhausted = task_ref.get().attempts >= core.config().max_attempts;
    log::info!(
        "Task {} {} ({}: {})",
        task_id,
        if exhausted {
            "exhausted its attempts"
        } else {
            "returns to pending"
        },
        cause.as_str(),
        message
    );
    {
        let mut task = task_ref.get_mut();
        task.prev_worker = Some(worker_id);
        task.assigned_at = None;
        if exhausted {
            core.db()
                .update_task_status(&task_id, "failed", None, None, Some(message))?;
            task.state = TaskRuntimeState::Failed(message.to_string());
        } else {
            core.db()
                .update_task_status(&task_id, "pending", None, None, Some(message))?;
            task.state = TaskRuntimeState::Pending;
        }
    }
    if exhausted {
        if let Some(job_ref) = core.get_job(&job_id).cloned() {
            check_job_completion(core, notifications, &job_ref)?;
        }
    } else {
        core.mark_pending(task_ref.clone());
    }
    notifications.wake_dispatcher();
    Ok(())
}

/// The job keeps running when its client goes away; results are persisted
/// and can be fetched later with `get_results`.
pub fn on_client_lost(core: &mut Core, job_id: &str) {
    if let Some(job_ref) = core.get_job(job_id) {
        if job_ref.get_mut().client.take().is_some() {
            log::info!(
                "Client of job {} disconnected; the job keeps running",
                job_id
            );
        }
    }
}

fn release_worker_slot(
    core: &mut Core,
    worker_id: &WorkerId,
    task_id: &str,
    completed: bool,
    exec_ms: u64,
) -> crate::Result<()> {
    if let Some(worker_ref) = core.get_worker(worker_id).cloned() {
        {
            let mut worker = worker_ref.get_mut();
            worker.active_tasks.remove(task_id);
            if completed {
                worker.record_completion(exec_ms);
            } else {
                worker.record_failure();
            }
        }
        let worker = worker_ref.get();
        let status = worker.status_name(core.config().max_concurrent_tasks);
        core.db()
            .update_worker_stats(worker_id, completed, exec_ms, worker.reliability)?;
        core.db().update_worker_status(worker_id, status, None)?;
    }
    Ok(())
}

pub fn job_status_reply(core: &Core, job_id: &str) -> crate::Result<ToClientMessage> {
    if let Some(job_ref) = core.get_job(job_id) {
        let job = job_ref.get();
        return Ok(ToClientMessage::JobStatus(JobStatusMsg {
            job_id: job_id.to_string(),
            data: JobStatusData {
                status: job.status.as_str().to_string(),
                total_tasks: job.total_tasks,
                counts: job.status_counts(),
            },
        }));
    }
    match core.db().query_job(job_id)? {
        Some(row) => {
            let mut counts = TaskStatusCounts::default();
            for task in core.db().query_tasks_by_job(job_id)? {
                match task.status.as_str() {
                    "pending" => counts.pending += 1,
                    "assigned" => counts.assigned += 1,
                    "running" => counts.running += 1,
                    "completed" => counts.completed += 1,
                    _ => counts.failed += 1,
                }
            }
            Ok(ToClientMessage::JobStatus(JobStatusMsg {
                job_id: job_id.to_string(),
                data: JobStatusData {
                    status: row.status,
                    total_tasks: row.total_tasks.max(0) as usize,
                    counts,
                },
            }))
        }
        None => Ok(unknown_job_reply(job_id)),
    }
}

/// Late retrieval of a finished job's outcome straight from the store.
pub fn job_results_reply(core: &Core, job_id: &str) -> crate::Result<ToClientMessage> {
    let row = match core.db().query_job(job_id)? {
        Some(row) => row,
        None => return Ok(unknown_job_reply(job_id)),
    };
    match row.status.as_str() {
        "completed" => {
            let results = core
                .db()
                .query_tasks_by_job(job_id)?
                .into_iter()
                .map(|task| match task.result {
                    Some(raw) => serde_json::from_str(&raw)
                        .unwrap_or(serde_json::Value::String(raw)),
                    None => serde_json::Value::Null,
                })
                .collect();
            Ok(ToClientMessage::JobResult(JobResultMsg {
                job_id: job_id.to_string(),
                data: JobResultData { results },
            }))
        }
        "failed" | "cancelled" => {
            let failures = core
                .db()
                .query_tasks_by_job(job_id)?
                .into_iter()
                .filter(|task| task.status == "failed")
                .map(|task| TaskFailure {
                    task_id: task.id,
                    worker_id: task.worker_id,
                    error: task.error_message.unwrap_or_default(),
                })
                .collect();
            Ok(ToClientMessage::JobError(JobErrorMsg {
                job_id: job_id.to_string(),
                data: JobErrorData {
                    error: row
                        .error_message
                        .unwrap_or_else(|| format!("job is {}", row.status)),
                    failures,
                },
            }))
        }
        _ => job_status_reply(core, job_id),
    }
}

fn unknown_job_reply(job_id: &str) -> ToClientMessage {
    ToClientMessage::Error(ErrorMsg::new(
        ErrorKind::BadMessage,
        format!("unknown job {}", job_id),
    ))
}

/// Runtime strategy toggle. In-flight assignments are never disturbed; only
/// future dispatch rounds see the new strategy.
pub fn on_set_scheduler(core: &mut Core, name: &str) -> ToClientMessage {
    match name.parse() {
        Ok(kind) => {
            core.set_scheduler(kind);
            ToClientMessage::SchedulerChanged {
                data: SchedulerChangedData {
                    scheduler: core.scheduler_name().to_string(),
                },
            }
        }
        Err(error) => ToClientMessage::Error(ErrorMsg::new(ErrorKind::BadMessage, error)),
    }
}
