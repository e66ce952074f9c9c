use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::common::JobId;

/// The client side of a job: the connection that submitted it and is owed the
/// final `job_result` / `job_error`. Dropped when the connection closes; the
/// job itself keeps running. Messages to a client travel through the
/// connection's outbound queue, captured by `Notifications` at queue time so
/// delivery outlives the job record.
#[derive(Debug)]
pub struct Client {
    job_id: JobId,
    sender: UnboundedSender<Bytes>,
}

impl Client {
    pub fn new(job_id: JobId, sender: UnboundedSender<Bytes>) -> Self {
        Client { job_id, sender }
    }

    #[inline]
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    #[inline]
    pub fn sender(&self) -> UnboundedSender<Bytes> {
        self.sender.clone()
    }
}
