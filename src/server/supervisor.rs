use std::time::Instant;

use crate::protocol::messages::{FailureKind, ToWorkerMessage};
use crate::server::comm::CommRef;
use crate::server::completion::fail_job;
use crate::server::core::{Core, CoreRef};
use crate::server::notifications::Notifications;
use crate::server::reactor::{on_worker_lost, revert_task_to_pending};

/// Periodic guardian of the three liveness contracts: worker heartbeats,
/// assignment staleness and job deadlines.
pub async fn supervisor_loop(core_ref: CoreRef, comm_ref: CommRef) -> crate::Result<()> {
    let period = core_ref.get().config().supervisor_interval;
    let mut interval = tokio::time::interval(period);
    // The first tick of a tokio interval fires immediately; skip it.
    interval.tick().await;

    loop {
        interval.tick().await;
        if core_ref.get().is_stopped() {
            break;
        }
        let mut notifications = Notifications::default();
        let mut core = core_ref.get_mut();
        if let Err(e) = sweep(&mut core, &mut notifications, Instant::now()) {
            log::error!("Supervisor sweep failed: {}", e);
        }
        comm_ref.get_mut().notify(&mut core, notifications)?;
    }
    Ok(())
}

/// One sweep over the registries, separated from the loop so tests can drive
/// it with a synthetic clock.
pub fn sweep(core: &mut Core, notifications: &mut Notifications, now: Instant) -> crate::Result<()> {
    sweep_heartbeats(core, notifications, now)?;
    sweep_stale_tasks(core, notifications, now)?;
    sweep_deadlines(core, notifications, now)?;
    Ok(())
}

/// Workers silent beyond the heartbeat timeout go `gone` and their tasks
/// return to pending; the rest get a keepalive ping.
fn sweep_heartbeats(
    core: &mut Core,
    notifications: &mut Notifications,
    now: Instant,
) -> crate::Result<()> {
    let timeout = core.config().heartbeat_timeout;
    let mut expired = Vec::new();
    let mut live = Vec::new();
    for worker_ref in core.workers() {
        let worker = worker_ref.get();
        if !worker.alive {
            continue;
        }
        if now.saturating_duration_since(worker.last_heartbeat) > timeout {
            expired.push(worker.id.clone());
        } else {
            live.push(worker.id.clone());
        }
    }
    for worker_id in expired {
        log::warn!("Worker {} heartbeat timed out", worker_id);
        on_worker_lost(core, notifications, &worker_id, FailureKind::Timeout)?;
    }
    for worker_id in live {
        notifications.queue_worker_message(&worker_id, ToWorkerMessage::Ping);
    }
    Ok(())
}

/// Tasks sitting in `assigned`/`running` beyond the staleness bound return
/// to pending and the holding worker is probed; if the probe cannot be
/// delivered the flush path marks the worker `gone`.
fn sweep_stale_tasks(
    core: &mut Core,
    notifications: &mut Notifications,
    now: Instant,
) -> crate::Result<()> {
    let stale_after = core.config().task_stale_after;
    let stale: Vec<_> = core
        .tasks()
        .filter(|task_ref| {
            let task = task_ref.get();
            match (task.assignee(), task.assigned_at) {
                (Some(_), Some(assigned_at)) => {
                    now.saturating_duration_since(assigned_at) > stale_after
                }
                _ => false,
            }
        })
        .cloned()
        .collect();

    for task_ref in stale {
        let holder = task_ref.get().assignee().cloned();
        revert_task_to_pending(
            core,
            notifications,
            &task_ref,
            FailureKind::Stuck,
            "assignment exceeded the staleness bound",
        )?;
        if let Some(worker_id) = holder {
            if core
                .get_worker(&worker_id)
                .map(|w| w.get().alive)
                .unwrap_or(false)
            {
                notifications.queue_worker_message(&worker_id, ToWorkerMessage::Ping);
            }
        }
    }
    Ok(())
}

fn sweep_deadlines(
    core: &mut Core,
    notifications: &mut Notifications,
    now: Instant,
) -> crate::Result<()> {
    let overdue: Vec<_> = core
        .jobs()
        .filter(|job_ref| {
            let job = job_ref.get();
            !job.status.is_terminal()
                && job.deadline.map(|deadline| deadline <= now).unwrap_or(false)
        })
        .cloned()
        .collect();

    for job_ref in overdue {
        fail_job(core, notifications, &job_ref, "job deadline exceeded")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use crate::protocol::messages::ToClientMessage;
    use crate::protocol::messages::ToWorkerMessage;
    use crate::server::notifications::Notifications;
    use crate::test_util::{dispatch_now, submit_job, test_core, worker};

    use super::sweep;

    #[test]
    fn heartbeat_timeout_reverts_tasks_and_marks_gone() {
        let mut core = test_core();
        submit_job(&mut core, "j1", vec![json!([1])]);
        let (worker_ref, _rx) = worker(&mut core, "w0");
        dispatch_now(&mut core);
        assert!(!worker_ref.get().active_tasks.is_empty());

        let timeout = core.config().heartbeat_timeout;
        let mut notifications = Notifications::default();
        sweep(&mut core, &mut notifications, Instant::now() + timeout * 2).unwrap();

        assert!(!worker_ref.get().alive);
        assert!(core.get_task("j1_task_0").unwrap().get().is_pending());
        assert!(notifications.dispatcher_wake);
        let failures = core.db().query_worker_failures("w0").unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].cause, "timeout");
    }

    #[test]
    fn live_workers_get_pinged() {
        let mut core = test_core();
        let (_worker_ref, _rx) = worker(&mut core, "w0");

        let mut notifications = Notifications::default();
        sweep(&mut core, &mut notifications, Instant::now()).unwrap();
        assert_eq!(
            notifications.worker_messages("w0"),
            &[ToWorkerMessage::Ping]
        );
    }

    #[test]
    fn stale_assignment_returns_to_pending_and_probes_holder() {
        let mut core = test_core();
        submit_job(&mut core, "j1", vec![json!([1])]);
        let (worker_ref, _rx) = worker(&mut core, "w0");
        dispatch_now(&mut core);

        // Keep the heartbeat fresh so only the staleness sweep triggers.
        let stale_after = core.config().task_stale_after;
        let probe_at = Instant::now() + stale_after + Duration::from_secs(1);
        worker_ref.get_mut().last_heartbeat = probe_at;

        let mut notifications = Notifications::default();
        sweep(&mut core, &mut notifications, probe_at).unwrap();

        let task = core.get_task("j1_task_0").unwrap().get();
        assert!(task.is_pending());
        assert_eq!(task.prev_worker.as_deref(), Some("w0"));
        assert!(notifications
            .worker_messages("w0")
            .contains(&ToWorkerMessage::Ping));
        let failures = core.db().query_worker_failures("w0").unwrap();
        assert_eq!(failures[0].cause, "stuck");
    }

    #[test]
    fn deadline_exceeded_fails_job_and_notifies_client() {
        let mut core = test_core();
        let (job, _client_rx) = submit_job(&mut core, "j1", vec![json!([1])]);
        job.get_mut().deadline = Some(Instant::now());

        let mut notifications = Notifications::default();
        sweep(
            &mut core,
            &mut notifications,
            Instant::now() + Duration::from_secs(1),
        )
        .unwrap();

        assert!(core.get_job("j1").is_none());
        assert_eq!(core.db().query_job("j1").unwrap().unwrap().status, "failed");
        let messages = notifications.client_messages("j1");
        assert!(matches!(messages[0], ToClientMessage::JobError(_)));
    }
}
