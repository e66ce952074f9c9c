pub mod codec;
pub mod messages;

pub use codec::FrameCodec;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Every `type` value the foreman recognises, in either direction. A message
/// whose discriminator is missing from this list gets an
/// `unknown_message_type` reply; everything else that fails to decode is a
/// `bad_message`.
pub const KNOWN_MESSAGE_TYPES: &[&str] = &[
    "submit_job",
    "get_job_status",
    "get_results",
    "set_scheduler",
    "register_worker",
    "worker_ready",
    "task_result",
    "task_error",
    "task_checkpoint",
    "worker_heartbeat",
    "ping",
    "pong",
    "disconnect",
    "assign_task",
    "checkpoint_ack",
    "job_accepted",
    "job_result",
    "job_error",
    "job_status",
    "scheduler_changed",
    "error",
];

/// Decode failure modes that are recoverable per connection: the offending
/// frame is answered with an `error` reply and the receive loop continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    BadMessage(String),
    UnknownType(String),
}

/// Two-stage decode: check the envelope (object with a string `type` that we
/// recognise), then deserialize into the expected message enum. Unknown
/// top-level fields are ignored by serde.
pub fn decode_message<T: DeserializeOwned>(frame: &[u8]) -> Result<T, DecodeError> {
    let value: Value = serde_json::from_slice(frame)
        .map_err(|e| DecodeError::BadMessage(format!("malformed JSON: {}", e)))?;
    let message_type = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| DecodeError::BadMessage("missing message type".to_string()))?;
    if !KNOWN_MESSAGE_TYPES.contains(&message_type) {
        return Err(DecodeError::UnknownType(message_type.to_string()));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::BadMessage(e.to_string()))
}

pub fn serialize_message<T: Serialize>(message: &T) -> crate::Result<Bytes> {
    Ok(serde_json::to_vec(message)?.into())
}

#[cfg(test)]
mod tests {
    use super::messages::{FromWorkerMessage, GenericMessage};
    use super::{decode_message, DecodeError};

    #[test]
    fn unknown_type_is_distinguished_from_bad_message() {
        let err = decode_message::<GenericMessage>(br#"{"type": "frobnicate"}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType("frobnicate".to_string()));

        let err = decode_message::<GenericMessage>(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::BadMessage(_)));

        let err = decode_message::<GenericMessage>(br#"{"job_id": "j1"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::BadMessage(_)));
    }

    #[test]
    fn missing_required_field_is_bad_message() {
        // register_worker without a worker id
        let err = decode_message::<FromWorkerMessage>(br#"{"type": "register_worker"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::BadMessage(_)));
    }

    #[test]
    fn known_type_decodes() {
        let msg: FromWorkerMessage = decode_message(br#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, FromWorkerMessage::Ping);
    }
}
