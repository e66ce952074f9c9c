use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::CrowdError;

/// Drives one connection's outbound side. All sends for a connection are
/// funneled through its queue, so frames never interleave on the wire.
/// A send exceeding `send_timeout` is reported as an error, which the caller
/// treats as a disconnect.
pub async fn forward_queue_to_sink<S: Sink<Bytes, Error = CrowdError> + Unpin>(
    mut queue: UnboundedReceiver<Bytes>,
    mut sink: S,
    send_timeout: Duration,
) -> crate::Result<()> {
    while let Some(data) = queue.recv().await {
        match tokio::time::timeout(send_timeout, sink.send(data)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("Forwarding from queue failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                return Err(CrowdError::generic("outbound send timed out"));
            }
        }
    }
    Ok(())
}
