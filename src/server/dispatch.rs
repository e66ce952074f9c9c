use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

use crate::error::CrowdError;
use crate::protocol::messages::{AssignTaskData, AssignTaskMsg, ToWorkerMessage};
use crate::scheduler::protocol::Assignment;
use crate::server::comm::CommRef;
use crate::server::core::{Core, CoreRef};
use crate::server::notifications::Notifications;
use crate::server::task::TaskRuntimeState;

/// Drives the scheduler. Fires on explicit wakes (job submitted, task back
/// to pending, worker became idle) and on a periodic tick that catches
/// anything a wake missed. Wakes arriving while a round is running coalesce
/// into the next round.
pub async fn dispatcher_loop(
    core_ref: CoreRef,
    comm_ref: CommRef,
    mut wake: UnboundedReceiver<()>,
) -> crate::Result<()> {
    let tick = core_ref.get().config().dispatch_tick;
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            message = wake.recv() => {
                if message.is_none() {
                    break;
                }
                while wake.try_recv().is_ok() {}
            }
        }
        if core_ref.get().is_stopped() {
            break;
        }
        dispatch_tasks(&core_ref, &comm_ref).await?;
    }
    Ok(())
}

/// One dispatch round: snapshot, select, commit. The strategy's output is
/// advisory; every pair is re-verified under the core borrow before any
/// state changes, so a selection raced by a task result or a worker loss is
/// simply skipped.
pub async fn dispatch_tasks(core_ref: &CoreRef, comm_ref: &CommRef) -> crate::Result<()> {
    let (pending, workers, offloaded) = core_ref.get_mut().snapshot_for_dispatch();
    if pending.is_empty() || workers.is_empty() {
        return Ok(());
    }

    let assignments = if offloaded {
        // The swarm optimiser is too expensive for this thread; lend it the
        // snapshots and run it on the blocking pool.
        let mut scheduler = match core_ref.get_mut().take_scheduler() {
            Some(scheduler) => scheduler,
            None => return Ok(()),
        };
        let result = tokio::task::spawn_blocking(move || {
            let assignments = scheduler.select(&pending, &workers);
            (scheduler, assignments)
        })
        .await
        .map_err(|e| CrowdError::SchedulerError(format!("scheduler run failed: {}", e)))?;
        core_ref.get_mut().restore_scheduler(result.0);
        result.1
    } else {
        core_ref.get_mut().run_scheduler(&pending, &workers)
    };
    if assignments.is_empty() {
        return Ok(());
    }

    let mut notifications = Notifications::default();
    let mut core = core_ref.get_mut();
    commit_assignments(&mut core, &mut notifications, assignments)?;
    comm_ref.get_mut().notify(&mut core, notifications)
}

/// Applies scheduler pairs: transitions task and worker, persists both and
/// queues the `assign_task` carrying the cached function blob. Returns how
/// many pairs actually committed.
pub fn commit_assignments(
    core: &mut Core,
    notifications: &mut Notifications,
    assignments: Vec<Assignment>,
) -> crate::Result<usize> {
    let max_concurrent = core.config().max_concurrent_tasks;
    let mut committed = 0;

    for assignment in assignments {
        let task_ref = match core.get_task(&assignment.task).cloned() {
            Some(task_ref) => task_ref,
            None => continue,
        };
        let worker_ref = match core.get_worker(&assignment.worker).cloned() {
            Some(worker_ref) => worker_ref,
            None => continue,
        };
        if !task_ref.get().is_pending() || !worker_ref.get().is_idle(max_concurrent) {
            log::debug!(
                "Skipping stale assignment of task {} to worker {}",
                assignment.task,
                assignment.worker
            );
            continue;
        }
        let (job_id, task_args) = {
            let task = task_ref.get();
            (task.job_id.clone(), task.args.clone())
        };
        let func_code = match core.func_code(&job_id).cloned() {
            Some(func_code) => func_code,
            // The job was finalized while this round was in flight.
            None => continue,
        };

        {
            let mut task = task_ref.get_mut();
            task.state = TaskRuntimeState::Assigned(assignment.worker.clone());
            task.attempts += 1;
            task.assigned_at = Some(std::time::Instant::now());
        }
        worker_ref
            .get_mut()
            .active_tasks
            .insert(assignment.task.clone());

        core.db().update_task_status(
            &assignment.task,
            "assigned",
            Some(assignment.worker.as_str()),
            None,
            None,
        )?;
        let status = worker_ref.get().status_name(max_concurrent);
        core.db().update_worker_status(
            &assignment.worker,
            status,
            Some(assignment.task.as_str()),
        )?;

        log::debug!(
            "Assigned task {} to worker {}",
            assignment.task,
            assignment.worker
        );
        notifications.queue_worker_message(
            &assignment.worker,
            ToWorkerMessage::AssignTask(AssignTaskMsg {
                job_id,
                data: AssignTaskData {
                    task_id: assignment.task,
                    func_code,
                    task_args,
                },
            }),
        );
        committed += 1;
    }
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::scheduler::protocol::Assignment;
    use crate::server::notifications::Notifications;
    use crate::server::task::TaskRuntimeState;
    use crate::test_util::{submit_job, test_core, worker};

    use super::commit_assignments;

    #[test]
    fn commit_skips_non_pending_tasks() {
        let mut core = test_core();
        let mut notifications = Notifications::default();
        let (job, _client_rx) = submit_job(&mut core, "j1", vec![json!([1]), json!([2])]);
        let (_w, _rx) = worker(&mut core, "w0");

        job.get().tasks[0].get_mut().state = TaskRuntimeState::Finished(json!(1));
        let committed = commit_assignments(
            &mut core,
            &mut notifications,
            vec![
                Assignment {
                    task: "j1_task_0".into(),
                    worker: "w0".into(),
                },
                Assignment {
                    task: "j1_task_1".into(),
                    worker: "w0".into(),
                },
            ],
        )
        .unwrap();

        assert_eq!(committed, 1);
        let messages = notifications.worker_messages("w0");
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn commit_respects_worker_capacity() {
        let mut core = test_core();
        let mut notifications = Notifications::default();
        submit_job(&mut core, "j1", vec![json!([1]), json!([2])]);
        let (_w, _rx) = worker(&mut core, "w0");

        let committed = commit_assignments(
            &mut core,
            &mut notifications,
            vec![
                Assignment {
                    task: "j1_task_0".into(),
                    worker: "w0".into(),
                },
                Assignment {
                    task: "j1_task_1".into(),
                    worker: "w0".into(),
                },
            ],
        )
        .unwrap();

        assert_eq!(committed, 1);
        let task = core.get_task("j1_task_0").unwrap().get();
        assert_eq!(task.attempts, 1);
        assert_eq!(task.assignee().map(String::as_str), Some("w0"));
    }

    #[test]
    fn assignment_carries_function_blob_verbatim() {
        let mut core = test_core();
        let mut notifications = Notifications::default();
        submit_job(&mut core, "j1", vec![json!([7])]);
        let (_w, _rx) = worker(&mut core, "w0");

        commit_assignments(
            &mut core,
            &mut notifications,
            vec![Assignment {
                task: "j1_task_0".into(),
                worker: "w0".into(),
            }],
        )
        .unwrap();

        match &notifications.worker_messages("w0")[0] {
            crate::protocol::messages::ToWorkerMessage::AssignTask(msg) => {
                assert_eq!(msg.job_id, "j1");
                assert_eq!(msg.data.func_code, crate::test_util::FUNC_HEX);
                assert_eq!(msg.data.task_args, json!([7]));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
