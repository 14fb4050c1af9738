use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::mr::coordinator::Coordinator;

/// Starts the background loop that clears stale assignments every
/// `interval`. The loop ends by itself once the run is done.
pub fn spawn(coordinator: Coordinator, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        release_timed_out_jobs(coordinator, interval).await;
    })
}

async fn release_timed_out_jobs(coordinator: Coordinator, interval: Duration) {
    info!(
        interval = ?interval,
        timeout = ?coordinator.job_timeout(),
        "start the running jobs checker"
    );
    loop {
        time::sleep(interval).await;
        if coordinator.done().await {
            debug!("run finished, stop the running jobs checker");
            return;
        }
        coordinator.release_expired().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mr::config::CoordinatorConfig;
    use crate::mr::coordinator::InputItem;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_clears_stale_assignment() {
        let config = CoordinatorConfig {
            n_reduce: 1,
            ..Default::default()
        };
        let input = InputItem {
            name: "only".to_string(),
            data: b"a b a".to_vec(),
        };
        let coordinator = Coordinator::new(vec![input], &config).unwrap();
        let job = coordinator.assign().await.unwrap();
        assert!(job.is_assigned());

        let handle = spawn(coordinator.clone(), config.sweep_interval);

        // still within the timeout
        time::sleep(Duration::from_secs(7)).await;
        assert!(coordinator.snapshot().await[0].is_assigned());

        time::sleep(Duration::from_secs(6)).await;
        let record = &coordinator.snapshot().await[0];
        assert!(!record.is_assigned());
        assert!(record.assigned_at().is_none());
        assert_eq!(coordinator.outstanding().await, 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_done() {
        let config = CoordinatorConfig {
            n_reduce: 1,
            ..Default::default()
        };
        let coordinator = Coordinator::new(vec![], &config).unwrap();
        let job = coordinator.assign().await.unwrap();
        coordinator
            .complete(crate::mr::job::Report {
                key: job.key(),
                lease: job.lease().unwrap(),
            })
            .await;
        assert!(coordinator.done().await);

        let handle = spawn(coordinator, Duration::from_secs(1));
        handle.await.unwrap();
    }
}
