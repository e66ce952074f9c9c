use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PROTOCOL_PORT: u16 = 9000;

/// Scheduling strategy selected at startup (`--scheduler`) or swapped at
/// runtime through a `set_scheduler` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Fifo,
    RoundRobin,
    LeastLoaded,
    Performance,
    Priority,
    Pso,
}

impl SchedulerKind {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerKind::Fifo => "fifo",
            SchedulerKind::RoundRobin => "round_robin",
            SchedulerKind::LeastLoaded => "least_loaded",
            SchedulerKind::Performance => "performance",
            SchedulerKind::Priority => "priority",
            SchedulerKind::Pso => "pso",
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(SchedulerKind::Fifo),
            "round_robin" => Ok(SchedulerKind::RoundRobin),
            "least_loaded" => Ok(SchedulerKind::LeastLoaded),
            "performance" => Ok(SchedulerKind::Performance),
            "priority" => Ok(SchedulerKind::Priority),
            "pso" => Ok(SchedulerKind::Pso),
            other => Err(format!("unknown scheduler strategy: {}", other)),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct ForemanConfig {
    pub host: String,
    pub port: u16,
    /// Database file; `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,
    pub scheduler: SchedulerKind,
    pub max_concurrent_tasks: usize,
    pub max_attempts: u32,
    pub heartbeat_timeout: Duration,
    pub task_stale_after: Duration,
    pub supervisor_interval: Duration,
    pub dispatch_tick: Duration,
    pub send_timeout: Duration,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        let heartbeat_timeout = Duration::from_secs(60);
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PROTOCOL_PORT,
            db_path: None,
            scheduler: SchedulerKind::Fifo,
            max_concurrent_tasks: 1,
            max_attempts: 3,
            heartbeat_timeout,
            task_stale_after: heartbeat_timeout * 5,
            supervisor_interval: Duration::from_secs(5),
            dispatch_tick: Duration::from_millis(250),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl ForemanConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
