use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::common::{JobId, Map, WorkerId};
use crate::protocol::messages::{ToClientMessage, ToWorkerMessage};
use crate::server::client::Client;

/// Outbound effects accumulated while a handler holds the core borrow.
/// Nothing is written to a connection until the handler returns and
/// `Comm::notify` flushes the batch, so handlers stay synchronous and
/// testable by inspecting this structure directly.
#[derive(Default)]
pub struct Notifications {
    pub workers: Map<WorkerId, Vec<ToWorkerMessage>>,
    pub clients: Map<JobId, ClientNotification>,
    pub dispatcher_wake: bool,
}

/// Client messages carry their own sender handle so delivery still works
/// after the job record has been dropped from the core (job finalisation
/// releases the job before the flush happens).
pub struct ClientNotification {
    pub sender: UnboundedSender<Bytes>,
    pub messages: Vec<ToClientMessage>,
}

impl Notifications {
    pub fn queue_worker_message(&mut self, worker_id: &WorkerId, message: ToWorkerMessage) {
        self.workers.entry(worker_id.clone()).or_default().push(message);
    }

    pub fn queue_client_message(&mut self, client: &Client, message: ToClientMessage) {
        self.clients
            .entry(client.job_id().clone())
            .or_insert_with(|| ClientNotification {
                sender: client.sender(),
                messages: Vec::new(),
            })
            .messages
            .push(message);
    }

    pub fn wake_dispatcher(&mut self) {
        self.dispatcher_wake = true;
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty() && self.clients.is_empty() && !self.dispatcher_wake
    }

    #[cfg(test)]
    pub fn client_messages(&self, job_id: &str) -> &[ToClientMessage] {
        self.clients
            .get(job_id)
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    #[cfg(test)]
    pub fn worker_messages(&self, worker_id: &str) -> &[ToWorkerMessage] {
        self.workers
            .get(worker_id)
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }
}
