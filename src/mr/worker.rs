use std::convert::TryFrom;
use std::fmt;

use tokio::time;
use tracing::{debug, info, warn};

use crate::mr::app::Application;
use crate::mr::config::WorkerConfig;
use crate::mr::coordinator::{Completion, Coordinator};
use crate::mr::error::{Error, Result};
use crate::mr::job::{Assignment, MapTask, ReduceTask, Report};
use crate::mr::partition::{self, PartitionWriter, Reduced};
use crate::mr::rpc;

/// Where a worker gets its jobs from.
#[tonic::async_trait]
pub trait JobSource: Send {
    async fn partition_count(&mut self) -> Result<u32>;
    async fn request_job(&mut self) -> Result<Assignment>;
    /// Returns whether the report retired the job.
    async fn report_done(&mut self, report: Report) -> Result<bool>;
}

/// In-process source, used when workers share the coordinator's runtime.
#[tonic::async_trait]
impl JobSource for Coordinator {
    async fn partition_count(&mut self) -> Result<u32> {
        Ok(self.n_reduce())
    }

    async fn request_job(&mut self) -> Result<Assignment> {
        let reply = match self.assign().await {
            Some(job) => rpc::Job::from(job),
            None => rpc::Job::default(),
        };
        Assignment::try_from(reply)
    }

    async fn report_done(&mut self, report: Report) -> Result<bool> {
        Ok(self.complete(report).await == Completion::Retired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Too many consecutive failed calls; the coordinator is presumably gone.
    TooManyFailures,
    /// Too many consecutive "no job" answers; the run is presumably over.
    NoWork,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TooManyFailures => f.write_str("too many failures"),
            ExitReason::NoWork => f.write_str("no job left"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Partition count not known yet.
    Bootstrapping,
    Polling,
    Executing,
    Terminated(ExitReason),
}

pub struct Worker<S> {
    source: S,
    app: Application,
    config: WorkerConfig,
    state: WorkerState,
    n_reduce: Option<u32>,
    failures: u32,
    idle_polls: u32,
    completed: usize,
}

impl<S: JobSource> Worker<S> {
    pub fn new(source: S, app: Application, config: WorkerConfig) -> Self {
        Worker {
            source,
            app,
            config,
            state: WorkerState::Bootstrapping,
            n_reduce: None,
            failures: 0,
            idle_polls: 0,
            completed: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Jobs this worker ran and reported.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Polls until one of the budgets runs out.
    pub async fn run(&mut self) -> ExitReason {
        loop {
            if let Some(reason) = self.step().await {
                return reason;
            }
        }
    }

    /// One iteration of the polling loop. Returns the exit reason once the
    /// worker reached its terminal state.
    pub async fn step(&mut self) -> Option<ExitReason> {
        if let WorkerState::Terminated(reason) = self.state {
            return Some(reason);
        }

        match self.poll().await {
            Ok(true) => {}
            Ok(false) => time::sleep(self.config.idle_backoff).await,
            Err(err) => {
                self.failures += 1;
                warn!(%err, failures = self.failures, "call to coordinator failed");
                if !self.check_budgets() {
                    time::sleep(self.config.idle_backoff).await;
                }
            }
        }

        self.check_budgets();
        match self.state {
            WorkerState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns whether a job was run.
    async fn poll(&mut self) -> Result<bool> {
        let n_reduce = match self.n_reduce {
            Some(n) => n,
            None => {
                let n = self.source.partition_count().await?;
                if n == 0 {
                    return Err(Error::Config("coordinator reported zero partitions"));
                }
                debug!(n_reduce = n, "got partition count");
                self.n_reduce = Some(n);
                self.state = WorkerState::Polling;
                n
            }
        };

        let assignment = self.source.request_job().await?;
        match assignment {
            Assignment::NoJob => {
                self.idle_polls += 1;
                debug!(idle_polls = self.idle_polls, "no job available");
                Ok(false)
            }
            Assignment::Map(task) => {
                self.reset_counters();
                self.state = WorkerState::Executing;
                self.run_map(&task, n_reduce);
                let report = Report::from(&task);
                self.state = WorkerState::Polling;
                self.report(report).await?;
                Ok(true)
            }
            Assignment::Reduce(task) => {
                self.reset_counters();
                self.state = WorkerState::Executing;
                let outcome = self.run_reduce(&task);
                self.state = WorkerState::Polling;
                let reduced = outcome?;
                if self.report(Report::from(&task)).await? {
                    partition::remove_intermediates(&reduced.inputs);
                } else {
                    debug!(
                        partition = task.partition,
                        "report not accepted, leaving intermediate files"
                    );
                }
                Ok(true)
            }
        }
    }

    fn reset_counters(&mut self) {
        self.failures = 0;
        self.idle_polls = 0;
    }

    /// Moves to `Terminated` once a budget is exhausted.
    fn check_budgets(&mut self) -> bool {
        let reason = if self.failures >= self.config.max_failures {
            Some(ExitReason::TooManyFailures)
        } else if self.idle_polls >= self.config.max_idle_polls {
            Some(ExitReason::NoWork)
        } else {
            None
        };
        if let Some(reason) = reason {
            if self.state != WorkerState::Terminated(reason) {
                info!(%reason, completed = self.completed, "worker exits");
            }
            self.state = WorkerState::Terminated(reason);
            return true;
        }
        false
    }

    async fn report(&mut self, report: Report) -> Result<bool> {
        let accepted = self.source.report_done(report).await?;
        self.completed += 1;
        Ok(accepted)
    }

    fn run_map(&self, task: &MapTask, n_reduce: u32) {
        info!(job_id = task.id, input = %task.name, lease = task.lease, "map");
        let contents = String::from_utf8_lossy(&task.data);
        let kvs = (self.app.map)(&task.name, &contents);

        let mut writer = PartitionWriter::new(&self.config.work_dir, task.id, n_reduce);
        for kv in &kvs {
            writer.write(kv);
        }
        let files = writer.finish();
        debug!(job_id = task.id, pairs = kvs.len(), files = files.len(), "map done");
    }

    fn run_reduce(&self, task: &ReduceTask) -> Result<Reduced> {
        info!(partition = task.partition, lease = task.lease, "reduce");
        partition::reduce_partition(&self.config.work_dir, task.partition, self.app.reduce)
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::mr::config::CoordinatorConfig;
    use crate::mr::coordinator::InputItem;
    use crate::mrapps::wc;

    fn worker_config(dir: &std::path::Path) -> WorkerConfig {
        WorkerConfig {
            work_dir: dir.to_path_buf(),
            max_failures: 3,
            max_idle_polls: 3,
            idle_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn word_count() -> Application {
        Application::new(wc::map, wc::reduce)
    }

    fn outputs(dir: &std::path::Path, n_reduce: u32) -> Vec<String> {
        let mut lines = vec![];
        for p in 0..n_reduce {
            let path = dir.join(partition::output_name(p));
            let contents = fs::read_to_string(path).unwrap();
            lines.extend(contents.lines().map(str::to_string));
        }
        lines.sort();
        lines
    }

    #[tokio::test]
    async fn test_word_count_across_two_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            n_reduce: 2,
            ..Default::default()
        };
        let input = InputItem {
            name: "in.txt".to_string(),
            data: b"a b a".to_vec(),
        };
        let coordinator = Coordinator::new(vec![input], &config).unwrap();

        let mut worker = Worker::new(coordinator.clone(), word_count(), worker_config(dir.path()));
        assert_eq!(worker.state(), WorkerState::Bootstrapping);
        let reason = worker.run().await;

        assert_eq!(reason, ExitReason::NoWork);
        assert_eq!(worker.state(), WorkerState::Terminated(ExitReason::NoWork));
        assert_eq!(worker.completed(), 3);
        assert!(coordinator.done().await);
        assert_eq!(outputs(dir.path(), 2), vec!["a 2", "b 1"]);
        for p in 0..2 {
            assert!(partition::intermediate_files(dir.path(), p)
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn test_two_workers_share_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            n_reduce: 3,
            ..Default::default()
        };
        let texts = ["the quick brown fox", "the lazy dog", "quick quick"];
        let inputs = texts
            .iter()
            .enumerate()
            .map(|(i, t)| InputItem {
                name: format!("in-{}", i),
                data: t.as_bytes().to_vec(),
            })
            .collect();
        let coordinator = Coordinator::new(inputs, &config).unwrap();

        let mut handles = vec![];
        for _ in 0..2 {
            let mut worker =
                Worker::new(coordinator.clone(), word_count(), worker_config(dir.path()));
            handles.push(tokio::spawn(async move {
                worker.run().await;
                worker.completed()
            }));
        }
        let mut completed = 0;
        for handle in handles {
            completed += handle.await.unwrap();
        }

        assert_eq!(completed, texts.len() + 3);
        assert!(coordinator.done().await);
        assert_eq!(
            outputs(dir.path(), 3),
            vec!["brown 1", "dog 1", "fox 1", "lazy 1", "quick 3", "the 2"]
        );
    }

    /// Scripted source for exercising the loop's budgets.
    struct Scripted {
        partition_count: VecDeque<Result<u32>>,
        jobs: VecDeque<Result<Assignment>>,
        reports: Vec<Report>,
        accept_reports: bool,
    }

    impl Scripted {
        fn new(
            partition_count: Vec<Result<u32>>,
            jobs: Vec<Result<Assignment>>,
            accept_reports: bool,
        ) -> Self {
            Scripted {
                partition_count: VecDeque::from(partition_count),
                jobs: VecDeque::from(jobs),
                reports: vec![],
                accept_reports,
            }
        }
    }

    #[tonic::async_trait]
    impl JobSource for Scripted {
        async fn partition_count(&mut self) -> Result<u32> {
            self.partition_count
                .pop_front()
                .unwrap_or(Err(Error::Config("script exhausted")))
        }

        async fn request_job(&mut self) -> Result<Assignment> {
            self.jobs
                .pop_front()
                .unwrap_or(Err(Error::Config("script exhausted")))
        }

        async fn report_done(&mut self, report: Report) -> Result<bool> {
            self.reports.push(report);
            Ok(self.accept_reports)
        }
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_exhausts_failure_budget() {
        let dir = tempfile::tempdir().unwrap();
        let source = Scripted::new(vec![], vec![], true);
        let mut worker = Worker::new(source, word_count(), worker_config(dir.path()));

        assert_eq!(worker.step().await, None);
        assert_eq!(worker.step().await, None);
        assert_eq!(worker.step().await, Some(ExitReason::TooManyFailures));
        assert_eq!(worker.state(), WorkerState::Terminated(ExitReason::TooManyFailures));
        // terminal state is sticky
        assert_eq!(worker.step().await, Some(ExitReason::TooManyFailures));
    }

    #[tokio::test]
    async fn test_job_resets_counters_and_unknown_phase_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = Scripted::new(
            vec![Err(Error::Config("down")), Ok(1)],
            vec![
                Ok(Assignment::NoJob),
                Err(Error::UnknownPhase(7)),
                Ok(Assignment::Map(MapTask {
                    id: 0,
                    name: "x".to_string(),
                    data: b"w w".to_vec(),
                    lease: 1,
                })),
                Ok(Assignment::NoJob),
                Ok(Assignment::NoJob),
                Ok(Assignment::NoJob),
            ],
            true,
        );
        let mut worker = Worker::new(source, word_count(), worker_config(dir.path()));

        // partition count fails once, then the loop proceeds
        assert_eq!(worker.step().await, None);
        assert_eq!(worker.state(), WorkerState::Bootstrapping);
        assert_eq!(worker.step().await, None);
        assert_eq!(worker.idle_polls, 1);
        assert_eq!(worker.step().await, None);
        assert_eq!(worker.failures, 2);

        assert_eq!(worker.step().await, None);
        assert_eq!((worker.failures, worker.idle_polls), (0, 0));
        assert_eq!(worker.source.reports.len(), 1);
        assert!(dir.path().join(partition::intermediate_name(0, 0)).exists());

        assert_eq!(worker.run().await, ExitReason::NoWork);
        assert_eq!(worker.completed(), 1);
    }

    fn seed_partition(dir: &std::path::Path, partition: u32, job_id: u32) {
        let mut writer = PartitionWriter::new(dir, job_id, 1);
        writer.write(&new_kv!("k", "1"));
        writer.finish();
        assert!(dir.join(partition::intermediate_name(partition, job_id)).exists());
    }

    fn reduce_job(lease: u64) -> Result<Assignment> {
        Ok(Assignment::Reduce(ReduceTask {
            partition: 0,
            lease,
        }))
    }

    #[tokio::test]
    async fn test_rejected_reduce_report_keeps_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        seed_partition(dir.path(), 0, 0);
        let source = Scripted::new(vec![Ok(1)], vec![reduce_job(3)], false);
        let mut worker = Worker::new(source, word_count(), worker_config(dir.path()));

        assert_eq!(worker.step().await, None);
        assert_eq!(worker.source.reports.len(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join(partition::output_name(0))).unwrap(),
            "k 1\n"
        );
        // whoever holds the job now must still find the inputs
        assert_eq!(partition::intermediate_files(dir.path(), 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accepted_reduce_report_removes_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        seed_partition(dir.path(), 0, 0);
        seed_partition(dir.path(), 0, 1);
        let source = Scripted::new(vec![Ok(1)], vec![reduce_job(3)], true);
        let mut worker = Worker::new(source, word_count(), worker_config(dir.path()));

        assert_eq!(worker.step().await, None);
        assert_eq!(
            fs::read_to_string(dir.path().join(partition::output_name(0))).unwrap(),
            "k 2\n"
        );
        assert!(partition::intermediate_files(dir.path(), 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_reducer_leaves_inputs_for_current_holder() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            n_reduce: 1,
            job_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let coordinator = Coordinator::new(vec![], &config).unwrap();
        seed_partition(dir.path(), 0, 0);

        // W1 takes the reduce job and stalls past the timeout; W2 gets it
        let stalled = coordinator.assign().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let current = coordinator.assign().await.unwrap();
        assert_eq!(stalled.key(), current.key());

        // W1 wakes up, reduces and reports with its old lease
        let w1 = Scripted::new(
            vec![Ok(1)],
            vec![reduce_job(stalled.lease().unwrap())],
            false,
        );
        let mut w1 = Worker::new(w1, word_count(), worker_config(dir.path()));
        w1.step().await;
        let stale = w1.source.reports[0];
        assert_eq!(
            coordinator.complete(stale).await,
            Completion::Stale {
                current: current.lease()
            }
        );
        assert_eq!(partition::intermediate_files(dir.path(), 0).unwrap().len(), 1);

        // W2 still sees the full input and retires the job
        let reduced = partition::reduce_partition(dir.path(), 0, wc::reduce).unwrap();
        assert_eq!(fs::read_to_string(&reduced.output).unwrap(), "k 1\n");
        let report = Report {
            key: current.key(),
            lease: current.lease().unwrap(),
        };
        assert_eq!(coordinator.complete(report).await, Completion::Retired);
        assert!(coordinator.done().await);
    }
}
