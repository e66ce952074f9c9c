use crate::protocol::messages::{
    JobErrorData, JobErrorMsg, JobResultData, JobResultMsg, ToClientMessage,
};
use crate::server::core::Core;
use crate::server::job::{JobRef, JobStatus};
use crate::server::notifications::Notifications;

/// Runs after every task-state change. Once all tasks of the job are
/// terminal the job is finalized: results are aggregated in submission
/// order (or the per-task error list is gathered), the client is told, the
/// cached function blob is evicted and the in-memory record is dropped.
/// Store rows stay behind for late retrieval.
pub fn check_job_completion(
    core: &mut Core,
    notifications: &mut Notifications,
    job_ref: &JobRef,
) -> crate::Result<()> {
    {
        let job = job_ref.get();
        if job.status.is_terminal() || !job.all_tasks_terminal() {
            return Ok(());
        }
    }

    let job_id = job_ref.get().id.clone();
    if job_ref.get().any_task_failed() {
        // One record per failed attempt, from the failure log; a task retried
        // twice before giving up contributes two entries.
        let mut failures: Vec<_> = core
            .db()
            .query_job_failures(&job_id)?
            .into_iter()
            .map(|row| crate::protocol::messages::TaskFailure {
                task_id: row.task_id,
                worker_id: Some(row.worker_id),
                error: row.message,
            })
            .collect();
        if failures.is_empty() {
            failures = job_ref.get().collect_failures();
        }
        job_ref.get_mut().status = JobStatus::Failed;
        core.db().update_job_status(
            &job_id,
            "failed",
            Some(job_ref.get().completed_count() as i64),
            Some("one or more tasks exhausted their retries"),
        )?;
        log::info!(
            "Job {} failed ({} task failure(s))",
            job_id,
            failures.len()
        );
        if let Some(client) = job_ref.get().client.as_ref() {
            notifications.queue_client_message(
                client,
                ToClientMessage::JobError(JobErrorMsg {
                    job_id: job_id.clone(),
                    data: JobErrorData {
                        error: "one or more tasks exhausted their retries".to_string(),
                        failures,
                    },
                }),
            );
        }
    } else {
        let results = job_ref.get().collect_results();
        job_ref.get_mut().status = JobStatus::Completed;
        core.db()
            .update_job_status(&job_id, "completed", Some(results.len() as i64), None)?;
        log::info!("Job {} completed with {} result(s)", job_id, results.len());
        if let Some(client) = job_ref.get().client.as_ref() {
            notifications.queue_client_message(
                client,
                ToClientMessage::JobResult(JobResultMsg {
                    job_id: job_id.clone(),
                    data: JobResultData { results },
                }),
            );
        }
    }

    finalize(core, &job_id);
    Ok(())
}

/// Forcibly fails a job (deadline exceeded, operator action). Non-terminal
/// tasks are marked failed and taken away from their workers; results that
/// arrive later for them are ignored as stale.
pub fn fail_job(
    core: &mut Core,
    notifications: &mut Notifications,
    job_ref: &JobRef,
    error: &str,
) -> crate::Result<()> {
    let job_id = job_ref.get().id.clone();
    let max_concurrent = core.config().max_concurrent_tasks;

    for task_ref in job_ref.get().tasks.iter() {
        let mut task = task_ref.get_mut();
        if task.is_terminal() {
            continue;
        }
        if let Some(worker_id) = task.assignee().cloned() {
            if let Some(worker_ref) = core.get_worker(&worker_id) {
                let mut worker = worker_ref.get_mut();
                worker.active_tasks.remove(&task.id);
                let status = worker.status_name(max_concurrent);
                core.db().update_worker_status(&worker_id, status, None)?;
            }
        }
        task.state = crate::server::task::TaskRuntimeState::Failed(error.to_string());
        core.db()
            .update_task_status(&task.id, "failed", None, None, Some(error))?;
    }

    let failures = job_ref.get().collect_failures();
    job_ref.get_mut().status = JobStatus::Failed;
    core.db().update_job_status(
        &job_id,
        "failed",
        Some(job_ref.get().completed_count() as i64),
        Some(error),
    )?;
    log::warn!("Job {} failed: {}", job_id, error);
    if let Some(client) = job_ref.get().client.as_ref() {
        notifications.queue_client_message(
            client,
            ToClientMessage::JobError(JobErrorMsg {
                job_id: job_id.clone(),
                data: JobErrorData {
                    error: error.to_string(),
                    failures,
                },
            }),
        );
    }

    finalize(core, &job_id);
    // Freed workers can pick up other work right away.
    notifications.wake_dispatcher();
    Ok(())
}

fn finalize(core: &mut Core, job_id: &str) {
    core.evict_func_code(job_id);
    core.remove_job(job_id);
}
