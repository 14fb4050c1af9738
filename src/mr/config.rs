use std::path::PathBuf;
use std::time::Duration;

use crate::util::net as netutil;

/// How long a job may stay assigned before it is handed to someone else.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(10);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3);
pub const DONE_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const N_REDUCE: u32 = 10;

pub const MAX_FAILURES: u32 = 20;
pub const MAX_IDLE_POLLS: u32 = 20;
pub const IDLE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of reduce partitions.
    pub n_reduce: u32,

    /// Assignment age after which a job is considered abandoned. Shared by
    /// the assignment scan and the sweeper.
    pub job_timeout: Duration,

    /// Period of the background sweeper.
    pub sweep_interval: Duration,

    /// How often the driver checks whether the whole run has finished.
    pub done_poll_interval: Duration,

    /// Ignore completion reports whose lease is no longer the current one.
    pub fence_reports: bool,

    /// Rendezvous socket the coordinator listens on.
    pub socket: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            n_reduce: N_REDUCE,
            job_timeout: JOB_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            done_poll_interval: DONE_POLL_INTERVAL,
            fence_reports: true,
            socket: netutil::coordinator_sock(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding intermediate and output files. Must be shared with
    /// every other worker of the run.
    pub work_dir: PathBuf,

    /// Consecutive failed remote calls before the worker gives up.
    pub max_failures: u32,

    /// Consecutive "no job" answers before the worker assumes the run is over.
    pub max_idle_polls: u32,

    /// Pause after a "no job" answer or a failed call.
    pub idle_backoff: Duration,

    pub socket: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            work_dir: PathBuf::from("."),
            max_failures: MAX_FAILURES,
            max_idle_polls: MAX_IDLE_POLLS,
            idle_backoff: IDLE_BACKOFF,
            socket: netutil::coordinator_sock(),
        }
    }
}
