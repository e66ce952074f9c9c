#![cfg(test)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::common::WrappedRcRefCell;
use crate::config::ForemanConfig;
use crate::db::Database;
use crate::protocol::messages::{RegisterWorkerMsg, SubmitJobData, SubmitJobMsg, ToWorkerMessage};
use crate::server::core::Core;
use crate::server::dispatch::commit_assignments;
use crate::server::job::JobRef;
use crate::server::notifications::Notifications;
use crate::server::reactor;
use crate::server::worker::WorkerRef;

/// hex("def square(x): return x*x") — an opaque blob as far as the foreman
/// is concerned.
pub const FUNC_HEX: &str = "646566207371756172652878293a2072657475726e20782a78";

pub fn default_config() -> ForemanConfig {
    ForemanConfig::default()
}

pub fn test_core() -> Core {
    Core::new(Database::open_in_memory().unwrap(), default_config())
}

pub fn test_core_with(config: ForemanConfig) -> Core {
    Core::new(Database::open_in_memory().unwrap(), config)
}

pub fn submit_msg(job_id: &str, args: Vec<Value>) -> SubmitJobMsg {
    SubmitJobMsg {
        job_id: Some(job_id.to_string()),
        data: SubmitJobData {
            func_code: FUNC_HEX.to_string(),
            total_tasks: args.len(),
            args_list: args,
            checkpoint_interval: None,
            priority: None,
            deadline_secs: None,
        },
    }
}

/// Submits a (non-empty) job and returns its record together with the client
/// side of the connection queue.
pub fn submit_job(
    core: &mut Core,
    job_id: &str,
    args: Vec<Value>,
) -> (JobRef, UnboundedReceiver<Bytes>) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let mut notifications = Notifications::default();
    let accepted =
        reactor::on_submit_job(core, &mut notifications, submit_msg(job_id, args), sender)
            .unwrap()
            .expect("submission rejected");
    let job_ref = core.get_job(&accepted).cloned().expect("job not registered");
    (job_ref, receiver)
}

pub fn worker(core: &mut Core, worker_id: &str) -> (WorkerRef, UnboundedReceiver<Bytes>) {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let mut notifications = Notifications::default();
    let worker_ref = reactor::on_register_worker(
        core,
        &mut notifications,
        RegisterWorkerMsg {
            worker_id: worker_id.to_string(),
            data: Default::default(),
        },
        sender,
    )
    .unwrap();
    (worker_ref, receiver)
}

/// One synchronous dispatch round; returns the notifications it produced so
/// tests can inspect the emitted `assign_task` messages.
pub fn dispatch_now(core: &mut Core) -> Notifications {
    let (pending, workers, _) = core.snapshot_for_dispatch();
    let assignments = core.run_scheduler(&pending, &workers);
    let mut notifications = Notifications::default();
    commit_assignments(core, &mut notifications, assignments).unwrap();
    notifications
}

pub fn assigned_tasks(notifications: &Notifications, worker_id: &str) -> Vec<(String, Value)> {
    notifications
        .worker_messages(worker_id)
        .iter()
        .filter_map(|message| match message {
            ToWorkerMessage::AssignTask(msg) => {
                Some((msg.data.task_id.clone(), msg.data.task_args.clone()))
            }
            _ => None,
        })
        .collect()
}

pub fn drain_worker_queue(receiver: &mut UnboundedReceiver<Bytes>) -> Vec<ToWorkerMessage> {
    let mut messages = Vec::new();
    while let Ok(data) = receiver.try_recv() {
        messages.push(serde_json::from_slice(&data).unwrap());
    }
    messages
}

pub fn dummy_address() -> SocketAddr {
    "127.0.0.1:4200".parse().unwrap()
}

pub fn raw_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

pub fn encode_frame<T: Serialize>(message: &T) -> Vec<u8> {
    raw_frame(&serde_json::to_vec(message).unwrap())
}

pub fn parse_output<T: DeserializeOwned>(mut data: &[u8]) -> Vec<T> {
    let mut messages = Vec::new();
    while data.len() >= 4 {
        let size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let body = &data[4..4 + size];
        messages.push(serde_json::from_slice(body).unwrap());
        data = &data[4 + size..];
    }
    messages
}

/// In-memory duplex stub standing in for a TCP socket in rpc tests.
pub struct MemoryStream {
    input: Cursor<Vec<u8>>,
    output: WrappedRcRefCell<Vec<u8>>,
}

impl MemoryStream {
    pub fn new(input: Vec<u8>) -> (Self, WrappedRcRefCell<Vec<u8>>) {
        let output = WrappedRcRefCell::wrap(Vec::new());
        (
            Self {
                input: Cursor::new(input),
                output: output.clone(),
            },
            output,
        )
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let position = self.input.position() as usize;
        let data = self.input.get_ref();
        let remaining = &data[position.min(data.len())..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.input.set_position((position + n) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.output.get_mut().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
