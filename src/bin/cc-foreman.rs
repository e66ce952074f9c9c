use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;
use tokio::net::TcpListener;
use tokio::task::LocalSet;

use crowdcompute::config::{ForemanConfig, SchedulerKind};
use crowdcompute::db::Database;
use crowdcompute::server::dispatch::dispatcher_loop;
use crowdcompute::server::supervisor::supervisor_loop;
use crowdcompute::server::{connection_initiator, CommRef, CoreRef};

#[derive(Debug, StructOpt)]
#[structopt(name = "cc-foreman", about = "CrowdCompute foreman coordinator")]
struct Opts {
    #[structopt(long, default_value = "0.0.0.0")]
    host: String,

    #[structopt(long, default_value = "9000")]
    port: u16,

    /// Database file; the store stays in memory when omitted.
    #[structopt(long, parse(from_os_str))]
    db: Option<PathBuf>,

    /// Scheduling strategy: fifo, round_robin, least_loaded, performance,
    /// priority or pso.
    #[structopt(long, default_value = "fifo")]
    scheduler: SchedulerKind,

    #[structopt(long, default_value = "1")]
    max_concurrent_tasks: usize,

    #[structopt(long, default_value = "3")]
    max_attempts: u32,

    /// Seconds of silence before a worker is considered gone.
    #[structopt(long, default_value = "60")]
    heartbeat_timeout: u64,

    /// Seconds before an assigned task counts as stuck; defaults to five
    /// heartbeat timeouts.
    #[structopt(long)]
    task_stale_after: Option<u64>,

    #[structopt(long, default_value = "5")]
    supervisor_interval: u64,

    #[structopt(long, default_value = "10")]
    send_timeout: u64,
}

impl Opts {
    fn into_config(self) -> ForemanConfig {
        let heartbeat_timeout = Duration::from_secs(self.heartbeat_timeout);
        ForemanConfig {
            host: self.host,
            port: self.port,
            db_path: self.db,
            scheduler: self.scheduler,
            max_concurrent_tasks: self.max_concurrent_tasks.max(1),
            max_attempts: self.max_attempts.max(1),
            heartbeat_timeout,
            task_stale_after: self
                .task_stale_after
                .map(Duration::from_secs)
                .unwrap_or(heartbeat_timeout * 5),
            supervisor_interval: Duration::from_secs(self.supervisor_interval),
            send_timeout: Duration::from_secs(self.send_timeout),
            ..ForemanConfig::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> crowdcompute::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let config = Opts::from_args().into_config();
    let db = match &config.db_path {
        Some(path) => Database::open(path)?,
        None => Database::open_in_memory()?,
    };

    let (wake_sender, wake_receiver) = tokio::sync::mpsc::unbounded_channel();
    let core_ref = CoreRef::new(db, config.clone());
    let comm_ref = CommRef::new(wake_sender);

    // SIGINT asks the foreman to wind down: the accept loop stops and
    // unfinished jobs are returned to the store as cancelled.
    let (shutdown_sender, mut shutdown) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        if shutdown_sender.send(()).is_err() {
            log::warn!("Foreman is already shutting down");
        }
    })
    .expect("failed to install the interrupt handler");

    let listener = TcpListener::bind(config.listen_address()).await?;
    log::info!(
        "CrowdCompute foreman listening on {} (scheduler: {})",
        config.listen_address(),
        config.scheduler
    );

    let local = LocalSet::new();
    local
        .run_until(async {
            {
                let core_ref = core_ref.clone();
                let comm_ref = comm_ref.clone();
                tokio::task::spawn_local(async move {
                    if let Err(e) = dispatcher_loop(core_ref, comm_ref, wake_receiver).await {
                        log::error!("Dispatcher failed: {}", e);
                    }
                });
            }
            {
                let core_ref = core_ref.clone();
                let comm_ref = comm_ref.clone();
                tokio::task::spawn_local(async move {
                    if let Err(e) = supervisor_loop(core_ref, comm_ref).await {
                        log::error!("Supervisor failed: {}", e);
                    }
                });
            }

            tokio::select! {
                result = connection_initiator(listener, core_ref.clone(), comm_ref.clone()) => {
                    result?;
                }
                _ = shutdown.recv() => {
                    log::info!("Interrupt received, stopping the foreman");
                }
            }

            // Give in-flight handlers a moment to drain before the local
            // tasks are torn down.
            tokio::time::sleep(Duration::from_millis(250)).await;
            core_ref.get_mut().graceful_shutdown()?;
            Ok(())
        })
        .await
}
