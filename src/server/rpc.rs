use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use futures::future::Either;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::codec::Framed;

use crate::common::JobId;
use crate::protocol::codec::FrameCodec;
use crate::protocol::messages::{
    ErrorKind, ErrorMsg, FailureKind, FromClientMessage, FromWorkerMessage, GenericMessage,
    RegisterWorkerMsg, SubmitJobMsg, ToClientMessage, ToWorkerMessage,
};
use crate::protocol::{decode_message, serialize_message, DecodeError};
use crate::server::comm::CommRef;
use crate::server::core::CoreRef;
use crate::server::notifications::Notifications;
use crate::server::reactor;
use crate::server::worker::WorkerRef;
use crate::util::forward_queue_to_sink;

/// Accept loop. Must run inside a `LocalSet`; every connection gets its own
/// local task.
pub async fn connection_initiator(
    listener: TcpListener,
    core_ref: CoreRef,
    comm_ref: CommRef,
) -> crate::Result<()> {
    loop {
        let (socket, address) = listener.accept().await?;
        socket.set_nodelay(true)?;
        let core_ref = core_ref.clone();
        let comm_ref = comm_ref.clone();
        tokio::task::spawn_local(async move {
            log::debug!("New connection: {}", address);
            if let Err(e) = generic_rpc_loop(core_ref, comm_ref, socket, address).await {
                log::error!("Connection {} failed: {}", address, e);
            }
            log::debug!("Connection ended: {}", address);
        });
    }
}

fn decode_error_msg(error: &DecodeError) -> ErrorMsg {
    match error {
        DecodeError::BadMessage(message) => ErrorMsg::new(ErrorKind::BadMessage, message.clone()),
        DecodeError::UnknownType(message_type) => ErrorMsg::new(
            ErrorKind::UnknownMessageType,
            format!("unknown message type: {}", message_type),
        ),
    }
}

/// Per-connection entry point. The connection is role-less until its first
/// decodable `submit_job` or `register_worker` frame, after which the loop
/// specialises; the stateless query messages are answered right here.
pub async fn generic_rpc_loop<T: AsyncRead + AsyncWrite + Unpin>(
    core_ref: CoreRef,
    comm_ref: CommRef,
    stream: T,
    address: SocketAddr,
) -> crate::Result<()> {
    let framed = Framed::new(stream, FrameCodec::default());
    let (mut sink, mut stream) = framed.split();

    while let Some(frame) = stream.next().await {
        let frame = frame?;
        let message = match decode_message::<GenericMessage>(&frame) {
            Ok(message) => message,
            Err(error) => {
                let reply = ToClientMessage::Error(decode_error_msg(&error));
                sink.send(serialize_message(&reply)?).await?;
                continue;
            }
        };
        match message {
            GenericMessage::SubmitJob(msg) => {
                log::debug!("Connection {} bound as client", address);
                return client_rpc_loop(&core_ref, &comm_ref, address, stream, sink, msg).await;
            }
            GenericMessage::RegisterWorker(msg) => {
                log::debug!("Connection {} bound as worker {}", address, msg.worker_id);
                return worker_rpc_loop(&core_ref, &comm_ref, address, stream, sink, msg).await;
            }
            GenericMessage::GetJobStatus { job_id } => {
                let reply = reactor::job_status_reply(&core_ref.get(), &job_id)?;
                sink.send(serialize_message(&reply)?).await?;
            }
            GenericMessage::GetResults { job_id } => {
                let reply = reactor::job_results_reply(&core_ref.get(), &job_id)?;
                sink.send(serialize_message(&reply)?).await?;
            }
            GenericMessage::SetScheduler(msg) => {
                let reply =
                    reactor::on_set_scheduler(&mut core_ref.get_mut(), &msg.data.scheduler);
                sink.send(serialize_message(&reply)?).await?;
            }
            GenericMessage::Ping => {
                sink.send(serialize_message(&ToClientMessage::Pong)?).await?;
            }
            GenericMessage::Disconnect => break,
        }
    }
    Ok(())
}

async fn client_rpc_loop<Reader, Writer>(
    core_ref: &CoreRef,
    comm_ref: &CommRef,
    address: SocketAddr,
    mut receiver: Reader,
    sink: Writer,
    first_submit: SubmitJobMsg,
) -> crate::Result<()>
where
    Reader: Stream<Item = crate::Result<BytesMut>> + Unpin,
    Writer: Sink<Bytes, Error = crate::Error> + Unpin,
{
    let (queue_sender, queue_receiver) = unbounded_channel::<Bytes>();
    let send_timeout = core_ref.get().config().send_timeout;
    let bound_jobs: Rc<RefCell<Vec<JobId>>> = Default::default();

    {
        let mut core = core_ref.get_mut();
        let mut notifications = Notifications::default();
        if let Some(job_id) =
            reactor::on_submit_job(&mut core, &mut notifications, first_submit, queue_sender.clone())?
        {
            bound_jobs.borrow_mut().push(job_id);
        }
        comm_ref.get_mut().notify(&mut core, notifications)?;
    }

    let snd_loop = forward_queue_to_sink(queue_receiver, sink, send_timeout);

    let queue = queue_sender.clone();
    let jobs = bound_jobs.clone();
    let recv_loop = async {
        while let Some(frame) = receiver.next().await {
            let frame = frame?;
            let message = match decode_message::<FromClientMessage>(&frame) {
                Ok(message) => message,
                Err(error) => {
                    let reply = ToClientMessage::Error(decode_error_msg(&error));
                    let _ = queue.send(serialize_message(&reply)?);
                    continue;
                }
            };
            log::debug!("Client {} message: {:?}", address, message);
            match message {
                FromClientMessage::SubmitJob(msg) => {
                    let mut core = core_ref.get_mut();
                    let mut notifications = Notifications::default();
                    if let Some(job_id) =
                        reactor::on_submit_job(&mut core, &mut notifications, msg, queue.clone())?
                    {
                        jobs.borrow_mut().push(job_id);
                    }
                    comm_ref.get_mut().notify(&mut core, notifications)?;
                }
                FromClientMessage::GetJobStatus { job_id } => {
                    let reply = reactor::job_status_reply(&core_ref.get(), &job_id)?;
                    let _ = queue.send(serialize_message(&reply)?);
                }
                FromClientMessage::GetResults { job_id } => {
                    let reply = reactor::job_results_reply(&core_ref.get(), &job_id)?;
                    let _ = queue.send(serialize_message(&reply)?);
                }
                FromClientMessage::SetScheduler(msg) => {
                    let reply =
                        reactor::on_set_scheduler(&mut core_ref.get_mut(), &msg.data.scheduler);
                    let _ = queue.send(serialize_message(&reply)?);
                }
                FromClientMessage::Ping => {
                    let _ = queue.send(serialize_message(&ToClientMessage::Pong)?);
                }
                FromClientMessage::Disconnect => break,
            }
        }
        Ok::<(), crate::Error>(())
    };

    let result = futures::future::select(recv_loop.boxed_local(), snd_loop.boxed_local()).await;

    {
        let mut core = core_ref.get_mut();
        for job_id in bound_jobs.borrow().iter() {
            reactor::on_client_lost(&mut core, job_id);
        }
    }

    match result {
        Either::Left((recv_result, snd_fut)) => {
            // The receive side is done; unbinding above dropped the core's
            // queue handles, so the forwarder can drain what is left.
            drop(queue_sender);
            let _ = tokio::time::timeout(send_timeout, snd_fut).await;
            if let Err(e) = recv_result {
                log::error!("Error on client connection {}: {}", address, e);
            }
        }
        Either::Right((snd_result, _)) => {
            if let Err(e) = snd_result {
                log::error!("Error on client connection {}: {}", address, e);
            }
        }
    }
    log::info!("Client connection {} closed", address);
    Ok(())
}

async fn worker_rpc_loop<Reader, Writer>(
    core_ref: &CoreRef,
    comm_ref: &CommRef,
    address: SocketAddr,
    mut receiver: Reader,
    sink: Writer,
    registration: RegisterWorkerMsg,
) -> crate::Result<()>
where
    Reader: Stream<Item = crate::Result<BytesMut>> + Unpin,
    Writer: Sink<Bytes, Error = crate::Error> + Unpin,
{
    let (queue_sender, queue_receiver) = unbounded_channel::<Bytes>();
    let send_timeout = core_ref.get().config().send_timeout;

    let bound: Rc<RefCell<WorkerRef>> = {
        let mut core = core_ref.get_mut();
        let mut notifications = Notifications::default();
        let worker_ref =
            reactor::on_register_worker(&mut core, &mut notifications, registration, queue_sender.clone())?;
        comm_ref.get_mut().notify(&mut core, notifications)?;
        Rc::new(RefCell::new(worker_ref))
    };

    let snd_loop = forward_queue_to_sink(queue_receiver, sink, send_timeout);

    let queue = queue_sender.clone();
    let bound2 = bound.clone();
    let recv_loop = async {
        while let Some(frame) = receiver.next().await {
            let frame = frame?;
            let message = match decode_message::<FromWorkerMessage>(&frame) {
                Ok(message) => message,
                Err(error) => {
                    let reply = ToWorkerMessage::Error(decode_error_msg(&error));
                    let _ = queue.send(serialize_message(&reply)?);
                    continue;
                }
            };
            log::debug!("Worker {} message: {:?}", address, message);

            let worker_id = bound2.borrow().get().id.clone();
            let mut core = core_ref.get_mut();
            let mut notifications = Notifications::default();
            match message {
                FromWorkerMessage::RegisterWorker(msg) => {
                    let worker_ref = reactor::on_register_worker(
                        &mut core,
                        &mut notifications,
                        msg,
                        queue.clone(),
                    )?;
                    *bound2.borrow_mut() = worker_ref;
                }
                FromWorkerMessage::WorkerReady { .. } => {
                    reactor::on_worker_ready(&mut core, &mut notifications, &worker_id)?;
                }
                FromWorkerMessage::TaskResult(msg) => {
                    reactor::on_task_result(&mut core, &mut notifications, &worker_id, msg.data)?;
                }
                FromWorkerMessage::TaskError(msg) => {
                    reactor::on_task_error(&mut core, &mut notifications, &worker_id, msg.data)?;
                }
                FromWorkerMessage::TaskCheckpoint(msg) => {
                    reactor::on_task_checkpoint(&mut core, &mut notifications, &worker_id, msg)?;
                }
                FromWorkerMessage::WorkerHeartbeat { .. } | FromWorkerMessage::Pong => {
                    reactor::on_heartbeat(&mut core, &worker_id)?;
                }
                FromWorkerMessage::Ping => {
                    reactor::on_heartbeat(&mut core, &worker_id)?;
                    let _ = queue.send(serialize_message(&ToWorkerMessage::Pong)?);
                }
                FromWorkerMessage::Disconnect => {
                    comm_ref.get_mut().notify(&mut core, notifications)?;
                    break;
                }
            }
            comm_ref.get_mut().notify(&mut core, notifications)?;
        }
        Ok::<(), crate::Error>(())
    };

    let result = futures::future::select(recv_loop.boxed_local(), snd_loop.boxed_local()).await;

    // Mark the worker lost only if the registry still points at this
    // connection's binding; a duplicate registration may have replaced it.
    {
        let mut core = core_ref.get_mut();
        let mut notifications = Notifications::default();
        let worker_ref = bound.borrow().clone();
        let worker_id = worker_ref.get().id.clone();
        if core.get_worker(&worker_id) == Some(&worker_ref) {
            reactor::on_worker_lost(
                &mut core,
                &mut notifications,
                &worker_id,
                FailureKind::Disconnect,
            )?;
            worker_ref.get_mut().close_channel();
        }
        comm_ref.get_mut().notify(&mut core, notifications)?;
    }

    match result {
        Either::Left((recv_result, snd_fut)) => {
            drop(queue_sender);
            let _ = tokio::time::timeout(send_timeout, snd_fut).await;
            if let Err(e) = recv_result {
                log::error!("Error on worker connection {}: {}", address, e);
            }
        }
        Either::Right((snd_result, _)) => {
            if let Err(e) = snd_result {
                log::error!("Error on worker connection {}: {}", address, e);
            }
        }
    }
    log::info!("Worker connection {} closed", address);
    Ok(())
}
