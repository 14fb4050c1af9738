use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tonic::{transport::Server, Request, Response, Status};
use tracing::{debug, info, warn};

use crate::mr::config::CoordinatorConfig;
use crate::mr::error::{self, Error};
use crate::mr::job::{JobKey, JobRecord, Lease, Report};
use crate::mr::rpc::{
    self,
    coordinator_server::{Coordinator as CoordinatorRpc, CoordinatorServer},
};
use crate::mr::store::JobStore;
use crate::mr::sweeper;
use crate::util::net as netutil;

/// One input of the run, loaded before the coordinator starts serving.
#[derive(Debug, Clone)]
pub struct InputItem {
    pub name: String,
    pub data: Vec<u8>,
}

/// Outcome of a completion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The job was outstanding and is now retired.
    Retired,
    /// No such job: it was already retired, or never existed.
    Unknown,
    /// The job has been handed out again since the reporter got it.
    Stale { current: Option<Lease> },
}

/// Everything guarded by the coordinator's lock.
#[derive(Debug)]
pub(crate) struct Schedule {
    store: JobStore,
    produced_reduce: bool,
    n_reduce: u32,
    last_lease: Lease,
}

impl Schedule {
    pub(crate) fn new(inputs: Vec<InputItem>, n_reduce: u32) -> Self {
        let mut store = JobStore::new();
        for (i, input) in inputs.into_iter().enumerate() {
            store.insert(JobRecord::map(i as u32, input.name, input.data));
        }
        Schedule {
            store,
            produced_reduce: false,
            n_reduce,
            last_lease: 0,
        }
    }

    fn next_lease(&mut self) -> Lease {
        self.last_lease += 1;
        self.last_lease
    }

    fn assign_key(&mut self, key: &JobKey, now: Instant) -> Option<JobRecord> {
        let lease = self.next_lease();
        let job = self.store.get_mut(key)?;
        job.assign(now, lease);
        Some(job.clone())
    }

    /// Picks any job that is free or whose worker timed out. Once the map
    /// jobs are all retired, the first caller to find the store empty
    /// creates the reduce jobs and gets partition 0.
    pub(crate) fn assign(&mut self, now: Instant, timeout: Duration) -> Option<JobRecord> {
        let eligible = self
            .store
            .iter()
            .find(|job| job.is_eligible(now, timeout))
            .map(JobRecord::key);
        if let Some(key) = eligible {
            return self.assign_key(&key, now);
        }

        if self.store.is_empty() && !self.produced_reduce {
            self.produced_reduce = true;
            self.store
                .replace_all((0..self.n_reduce).map(JobRecord::reduce));
            info!(n_reduce = self.n_reduce, "map phase drained, reduce phase begins");
            return self.assign_key(&JobKey::reduce(0), now);
        }

        None
    }

    pub(crate) fn complete(&mut self, report: Report, fence: bool) -> Completion {
        let current = match self.store.get(&report.key) {
            None => return Completion::Unknown,
            Some(job) => job.lease(),
        };
        if fence && current != Some(report.lease) {
            return Completion::Stale { current };
        }
        self.store.remove(&report.key);
        Completion::Retired
    }

    pub(crate) fn release_expired(&mut self, now: Instant, timeout: Duration) -> usize {
        self.store.release_expired(now, timeout).len()
    }

    pub(crate) fn done(&self) -> bool {
        self.produced_reduce && self.store.is_empty()
    }
}

/// The coordinator. Cheap to clone; all clones share one schedule.
#[derive(Debug, Clone)]
pub struct Coordinator {
    schedule: Arc<Mutex<Schedule>>,
    n_reduce: u32,
    job_timeout: Duration,
    fence_reports: bool,
}

impl Coordinator {
    pub fn new(inputs: Vec<InputItem>, config: &CoordinatorConfig) -> error::Result<Self> {
        if config.n_reduce == 0 {
            return Err(Error::Config("n_reduce must be at least 1"));
        }
        info!(
            inputs = inputs.len(),
            n_reduce = config.n_reduce,
            "map phase begins"
        );
        Ok(Coordinator {
            schedule: Arc::new(Mutex::new(Schedule::new(inputs, config.n_reduce))),
            n_reduce: config.n_reduce,
            job_timeout: config.job_timeout,
            fence_reports: config.fence_reports,
        })
    }

    /// Reads every input file up front; the content travels with its map job.
    pub async fn from_files<P: AsRef<Path>>(
        files: &[P],
        config: &CoordinatorConfig,
    ) -> error::Result<Self> {
        let mut inputs = Vec::with_capacity(files.len());
        for file in files {
            let path = file.as_ref();
            let data = tokio::fs::read(path).await.map_err(|source| Error::Input {
                path: path.to_path_buf(),
                source,
            })?;
            inputs.push(InputItem {
                name: path.to_string_lossy().into_owned(),
                data,
            });
        }
        Self::new(inputs, config)
    }

    pub fn n_reduce(&self) -> u32 {
        self.n_reduce
    }

    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    /// Hands out a job, or `None` when nothing is available right now.
    pub async fn assign(&self) -> Option<JobRecord> {
        let now = Instant::now();
        let job = self.schedule.lock().await.assign(now, self.job_timeout);
        match &job {
            Some(job) => debug!(job = %job, "assigned"),
            None => debug!("no job available"),
        }
        job
    }

    pub async fn complete(&self, report: Report) -> Completion {
        let outcome = self
            .schedule
            .lock()
            .await
            .complete(report, self.fence_reports);
        match outcome {
            Completion::Retired => info!(job = %report.key, lease = report.lease, "job done"),
            Completion::Unknown => {
                debug!(job = %report.key, lease = report.lease, "report for retired job")
            }
            Completion::Stale { current } => warn!(
                job = %report.key,
                lease = report.lease,
                current = ?current,
                "report from a superseded assignment, ignoring"
            ),
        }
        outcome
    }

    /// Resets every assignment older than the job timeout.
    pub async fn release_expired(&self) -> usize {
        let now = Instant::now();
        let released = self
            .schedule
            .lock()
            .await
            .release_expired(now, self.job_timeout);
        if released > 0 {
            info!(released, "reclaimed timed out jobs");
        }
        released
    }

    /// True once the reduce jobs were created and all of them retired.
    pub async fn done(&self) -> bool {
        self.schedule.lock().await.done()
    }

    pub async fn outstanding(&self) -> usize {
        self.schedule.lock().await.store.len()
    }

    pub async fn snapshot(&self) -> Vec<JobRecord> {
        self.schedule.lock().await.store.iter().cloned().collect()
    }

    /// Serves the remote-call surface on `socket` until `shutdown` resolves.
    pub async fn serve<F>(self, socket: &Path, shutdown: F) -> error::Result<()>
    where
        F: Future<Output = ()>,
    {
        let incoming = netutil::listen(socket)?;
        let served = Server::builder()
            .add_service(CoordinatorServer::new(self))
            .serve_with_incoming_shutdown(incoming, shutdown)
            .await;
        netutil::remove_sock(socket);
        served?;
        Ok(())
    }

    /// Serves with the sweeper running and returns once the run is done.
    pub async fn run(self, config: &CoordinatorConfig) -> error::Result<()> {
        let sweeper = sweeper::spawn(self.clone(), config.sweep_interval);

        let watcher = self.clone();
        let poll = config.done_poll_interval;
        let finished = async move {
            loop {
                time::sleep(poll).await;
                if watcher.done().await {
                    break;
                }
            }
        };

        info!(socket = %config.socket.display(), "coordinator listening");
        let served = self.serve(&config.socket, finished).await;
        sweeper.abort();
        if served.is_ok() {
            info!("all jobs done, coordinator exits");
        }
        served
    }
}

#[tonic::async_trait]
impl CoordinatorRpc for Coordinator {
    async fn assign_job(
        &self,
        _request: Request<rpc::Empty>,
    ) -> Result<Response<rpc::Job>, Status> {
        let reply = match self.assign().await {
            Some(job) => rpc::Job::from(job),
            None => rpc::Job::default(),
        };
        Ok(Response::new(reply))
    }

    async fn report_job_done(
        &self,
        request: Request<rpc::Job>,
    ) -> Result<Response<rpc::ReportReply>, Status> {
        let accepted = match Report::try_from(request.into_inner()) {
            Ok(report) => self.complete(report).await == Completion::Retired,
            Err(err) => {
                warn!(%err, "ignoring malformed completion report");
                false
            }
        };
        Ok(Response::new(rpc::ReportReply { accepted }))
    }

    async fn get_partition_count(
        &self,
        _request: Request<rpc::Empty>,
    ) -> Result<Response<rpc::PartitionCount>, Status> {
        Ok(Response::new(rpc::PartitionCount {
            n_reduce: self.n_reduce,
        }))
    }
}
