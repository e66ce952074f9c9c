use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{JobId, TaskId, WorkerId};

/// Sender-visible error kinds carried by `error` replies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadMessage,
    UnknownMessageType,
    DuplicateWorkerId,
    TaskError,
    WorkerDisconnect,
    Timeout,
    Stuck,
    DeadlineExceeded,
    Internal,
}

/// Cause classes recorded in the worker-failure log.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Disconnect,
    TaskError,
    Timeout,
    Stuck,
    Reject,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Disconnect => "disconnect",
            FailureKind::TaskError => "task_error",
            FailureKind::Timeout => "timeout",
            FailureKind::Stuck => "stuck",
            FailureKind::Reject => "reject",
        }
    }
}

/// Device description reported by a worker at registration time.
/// Fields the worker does not report fall back to a conservative guess.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceSpecs {
    #[serde(default = "default_cpu_frequency")]
    pub cpu_frequency_ghz: f64,
    #[serde(default = "default_num_cores")]
    pub num_cores: u32,
    #[serde(default = "default_memory_gb")]
    pub memory_gb: f64,
    #[serde(default = "default_battery_level")]
    pub battery_level: f64,
    #[serde(default = "default_signal_strength")]
    pub signal_strength: u32,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub device_type: String,
}

fn default_cpu_frequency() -> f64 {
    1.0
}
fn default_num_cores() -> u32 {
    1
}
fn default_memory_gb() -> f64 {
    4.0
}
fn default_battery_level() -> f64 {
    100.0
}
fn default_signal_strength() -> u32 {
    5
}

impl Default for DeviceSpecs {
    fn default() -> Self {
        Self {
            cpu_frequency_ghz: default_cpu_frequency(),
            num_cores: default_num_cores(),
            memory_gb: default_memory_gb(),
            battery_level: default_battery_level(),
            signal_strength: default_signal_strength(),
            platform: String::new(),
            device_type: String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubmitJobData {
    /// Serialized user function, hex-encoded. Opaque to the foreman; it is
    /// forwarded verbatim in every `assign_task`.
    pub func_code: String,
    pub args_list: Vec<Value>,
    pub total_tasks: usize,
    #[serde(default)]
    pub checkpoint_interval: Option<f64>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub deadline_secs: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubmitJobMsg {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub data: SubmitJobData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetSchedulerData {
    pub scheduler: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SetSchedulerMsg {
    pub data: SetSchedulerData,
}

/// Messages a client connection may send after it is role-bound.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromClientMessage {
    SubmitJob(SubmitJobMsg),
    GetJobStatus { job_id: JobId },
    GetResults { job_id: JobId },
    SetScheduler(SetSchedulerMsg),
    Ping,
    Disconnect,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RegisterWorkerData {
    #[serde(default)]
    pub specs: Option<DeviceSpecs>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegisterWorkerMsg {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub data: RegisterWorkerData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskResultData {
    pub task_id: TaskId,
    pub result: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskResultMsg {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub data: TaskResultData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskErrorData {
    pub task_id: TaskId,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskErrorMsg {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub data: TaskErrorData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskCheckpointData {
    pub task_id: TaskId,
    pub checkpoint_id: String,
    #[serde(default)]
    pub is_base: bool,
    pub data_hex: String,
    #[serde(default)]
    pub progress_percent: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskCheckpointMsg {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub data: TaskCheckpointData,
}

/// Messages a worker connection may send after registration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromWorkerMessage {
    RegisterWorker(RegisterWorkerMsg),
    WorkerReady {
        #[serde(default)]
        worker_id: Option<WorkerId>,
    },
    TaskResult(TaskResultMsg),
    TaskError(TaskErrorMsg),
    TaskCheckpoint(TaskCheckpointMsg),
    WorkerHeartbeat {
        #[serde(default)]
        worker_id: Option<WorkerId>,
    },
    Ping,
    Pong,
    Disconnect,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignTaskData {
    pub task_id: TaskId,
    pub func_code: String,
    pub task_args: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignTaskMsg {
    pub job_id: JobId,
    pub data: AssignTaskData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointAckData {
    pub task_id: TaskId,
    pub checkpoint_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointAckMsg {
    pub job_id: JobId,
    pub data: CheckpointAckData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorData {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMsg {
    pub data: ErrorData,
}

impl ErrorMsg {
    pub fn new<T: Into<String>>(kind: ErrorKind, message: T) -> Self {
        Self {
            data: ErrorData {
                kind,
                message: message.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToWorkerMessage {
    AssignTask(AssignTaskMsg),
    CheckpointAck(CheckpointAckMsg),
    Ping,
    Pong,
    Error(ErrorMsg),
    /// Sent to the older connection when a worker id re-registers.
    Disconnect,
}

/// First-frame view of a connection whose role is not yet known. The first
/// decodable message binds the role: `submit_job` makes it a client
/// connection, `register_worker` a worker connection. The query messages can
/// be answered without ever binding a role.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenericMessage {
    SubmitJob(SubmitJobMsg),
    RegisterWorker(RegisterWorkerMsg),
    GetJobStatus { job_id: JobId },
    GetResults { job_id: JobId },
    SetScheduler(SetSchedulerMsg),
    Ping,
    Disconnect,
}

/// One entry of the per-task error list delivered with `job_error`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task_id: TaskId,
    #[serde(default)]
    pub worker_id: Option<WorkerId>,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobResultData {
    pub results: Vec<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobResultMsg {
    pub job_id: JobId,
    pub data: JobResultData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobErrorData {
    pub error: String,
    #[serde(default)]
    pub failures: Vec<TaskFailure>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobErrorMsg {
    pub job_id: JobId,
    pub data: JobErrorData,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskStatusCounts {
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobStatusData {
    pub status: String,
    pub total_tasks: usize,
    pub counts: TaskStatusCounts,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobStatusMsg {
    pub job_id: JobId,
    pub data: JobStatusData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerChangedData {
    pub scheduler: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToClientMessage {
    JobAccepted { job_id: JobId },
    JobResult(JobResultMsg),
    JobError(JobErrorMsg),
    JobStatus(JobStatusMsg),
    SchedulerChanged { data: SchedulerChangedData },
    Pong,
    Error(ErrorMsg),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_job_wire_shape() {
        let raw = r#"{
            "type": "submit_job",
            "job_id": "j1",
            "data": {
                "func_code": "deadbeef",
                "args_list": [[1], [2]],
                "total_tasks": 2
            },
            "extra_field": true
        }"#;
        let msg: FromClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            FromClientMessage::SubmitJob(submit) => {
                assert_eq!(submit.job_id.as_deref(), Some("j1"));
                assert_eq!(submit.data.total_tasks, 2);
                assert_eq!(submit.data.args_list.len(), 2);
                assert!(submit.data.priority.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn register_worker_without_specs() {
        let raw = r#"{"type": "register_worker", "worker_id": "w0"}"#;
        let msg: FromWorkerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            FromWorkerMessage::RegisterWorker(register) => {
                assert_eq!(register.worker_id, "w0");
                assert!(register.data.specs.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn device_specs_defaults_fill_missing_fields() {
        let raw = r#"{
            "type": "register_worker",
            "worker_id": "w0",
            "data": {"specs": {"num_cores": 8, "platform": "linux"}}
        }"#;
        let msg: FromWorkerMessage = serde_json::from_str(raw).unwrap();
        let specs = match msg {
            FromWorkerMessage::RegisterWorker(register) => register.data.specs.unwrap(),
            other => panic!("unexpected message: {:?}", other),
        };
        assert_eq!(specs.num_cores, 8);
        assert_eq!(specs.platform, "linux");
        assert_eq!(specs.battery_level, 100.0);
        assert_eq!(specs.signal_strength, 5);
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let msg = ToClientMessage::Error(ErrorMsg::new(ErrorKind::UnknownMessageType, "nope"));
        let raw = serde_json::to_string(&msg).unwrap();
        assert!(raw.contains("\"kind\":\"unknown_message_type\""));
        assert!(raw.contains("\"type\":\"error\""));
    }

    #[test]
    fn assign_task_roundtrip() {
        let msg = ToWorkerMessage::AssignTask(AssignTaskMsg {
            job_id: "j1".into(),
            data: AssignTaskData {
                task_id: "j1_task_0".into(),
                func_code: "cafe".into(),
                task_args: serde_json::json!([3]),
            },
        });
        let raw = serde_json::to_vec(&msg).unwrap();
        let back: ToWorkerMessage = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back, msg);
    }
}
