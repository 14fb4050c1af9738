use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mrjobs::mr::client::RpcClient;
use mrjobs::mr::config::{self, WorkerConfig};
use mrjobs::mr::worker::Worker;
use mrjobs::mrapps;
use mrjobs::util::net as netutil;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Runs map and reduce jobs handed out by the coordinator")]
struct Args {
    /// Built-in application (wc, indexer) or path to a plugin .so.
    app: String,

    /// Coordinator socket. Defaults to a per-user path under /var/tmp.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Shared directory for intermediate and output files.
    #[arg(short = 'd', long, default_value = ".")]
    work_dir: PathBuf,

    /// Consecutive failed calls before giving up.
    #[arg(long, default_value_t = config::MAX_FAILURES)]
    max_failures: u32,

    /// Consecutive empty polls before assuming the run is over.
    #[arg(long, default_value_t = config::MAX_IDLE_POLLS)]
    max_idle: u32,

    /// Pause after an empty poll or a failed call, in milliseconds.
    #[arg(long, default_value_t = config::IDLE_BACKOFF.as_millis() as u64)]
    backoff_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let app = mrapps::load(&args.app).with_context(|| format!("cannot load {}", args.app))?;
    let config = WorkerConfig {
        work_dir: args.work_dir,
        max_failures: args.max_failures,
        max_idle_polls: args.max_idle,
        idle_backoff: Duration::from_millis(args.backoff_ms),
        socket: args.socket.unwrap_or_else(netutil::coordinator_sock),
    };

    let source = RpcClient::new(config.socket.clone());
    let mut worker = Worker::new(source, app, config);
    let reason = worker.run().await;
    info!(%reason, completed = worker.completed(), "mrworker exits");

    Ok(())
}
