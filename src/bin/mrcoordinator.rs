use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mrjobs::mr::config::{self, CoordinatorConfig};
use mrjobs::mr::coordinator::Coordinator;
use mrjobs::util::net as netutil;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Hands out map and reduce jobs until all are done")]
struct Args {
    /// Input files, one map job each.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Number of reduce partitions.
    #[arg(short = 'r', long, default_value_t = config::N_REDUCE)]
    n_reduce: u32,

    /// Seconds before an assigned job is handed to another worker.
    #[arg(long, default_value_t = config::JOB_TIMEOUT.as_secs())]
    timeout: u64,

    /// Seconds between sweeps for timed out jobs.
    #[arg(long, default_value_t = config::SWEEP_INTERVAL.as_secs())]
    sweep: u64,

    /// Accept completion reports from superseded assignments.
    #[arg(long)]
    no_fence: bool,

    /// Socket to listen on. Defaults to a per-user path under /var/tmp.
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = CoordinatorConfig {
        n_reduce: args.n_reduce,
        job_timeout: Duration::from_secs(args.timeout),
        sweep_interval: Duration::from_secs(args.sweep),
        fence_reports: !args.no_fence,
        socket: args.socket.unwrap_or_else(netutil::coordinator_sock),
        ..Default::default()
    };

    let coordinator = Coordinator::from_files(&args.inputs, &config)
        .await
        .context("failed to load inputs")?;
    coordinator
        .run(&config)
        .await
        .with_context(|| format!("coordinator on {} failed", config.socket.display()))?;

    Ok(())
}
