use tokio::sync::mpsc::UnboundedSender;

use crate::common::WrappedRcRefCell;
use crate::protocol;
use crate::protocol::messages::FailureKind;
use crate::server::core::Core;
use crate::server::notifications::Notifications;
use crate::server::reactor::on_worker_lost;

pub type CommRef = WrappedRcRefCell<Comm>;

/// Flushes a handler's accumulated notifications into the per-connection
/// queues and pokes the dispatcher. A worker whose queue is already closed is
/// treated as lost, which may produce follow-up notifications (task reverts);
/// those are flushed in the same call.
pub struct Comm {
    dispatcher: UnboundedSender<()>,
}

impl Comm {
    pub fn notify(&mut self, core: &mut Core, notifications: Notifications) -> crate::Result<()> {
        let mut current = notifications;
        loop {
            if current.dispatcher_wake {
                // The dispatcher loop may be gone during shutdown; that is fine.
                let _ = self.dispatcher.send(());
            }

            let mut followup = Notifications::default();
            for (worker_id, messages) in current.workers {
                let worker_ref = match core.get_worker(&worker_id) {
                    Some(worker_ref) => worker_ref.clone(),
                    None => continue,
                };
                let mut delivery_failed = false;
                {
                    let worker = worker_ref.get();
                    for message in &messages {
                        if worker.send_message(message).is_err() {
                            delivery_failed = true;
                            break;
                        }
                    }
                }
                if delivery_failed {
                    log::error!("Delivery to worker {} failed; treating as lost", worker_id);
                    on_worker_lost(core, &mut followup, &worker_id, FailureKind::Disconnect)?;
                }
            }

            for (job_id, notification) in current.clients {
                for message in &notification.messages {
                    let data = protocol::serialize_message(message)?;
                    if notification.sender.send(data).is_err() {
                        log::warn!("Client connection of job {} is closed", job_id);
                        break;
                    }
                }
            }

            if followup.is_empty() {
                return Ok(());
            }
            current = followup;
        }
    }
}

impl CommRef {
    pub fn new(dispatcher: UnboundedSender<()>) -> Self {
        Self::wrap(Comm { dispatcher })
    }
}
