use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use tonic::transport::Channel;
use tracing::debug;

use crate::mr::error::Result;
use crate::mr::job::{Assignment, Report};
use crate::mr::rpc::{self, coordinator_client::CoordinatorClient};
use crate::mr::worker::JobSource;
use crate::util::net as netutil;

/// Talks to a coordinator in another process.
///
/// The connection is opened on first use and dropped after any failed
/// call, so the next call dials again.
#[derive(Debug)]
pub struct RpcClient {
    socket: PathBuf,
    inner: Option<CoordinatorClient<Channel>>,
}

impl RpcClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        RpcClient {
            socket: socket.into(),
            inner: None,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn client(&mut self) -> Result<&mut CoordinatorClient<Channel>> {
        let client = match self.inner.take() {
            Some(client) => client,
            None => {
                debug!(socket = %self.socket.display(), "connecting to coordinator");
                CoordinatorClient::new(netutil::connect(&self.socket).await?)
            }
        };
        Ok(self.inner.insert(client))
    }

    fn forget_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.inner = None;
        }
        result
    }
}

#[tonic::async_trait]
impl JobSource for RpcClient {
    async fn partition_count(&mut self) -> Result<u32> {
        let result = match self.client().await {
            Ok(client) => client
                .get_partition_count(rpc::Empty {})
                .await
                .map(|reply| reply.into_inner().n_reduce)
                .map_err(Into::into),
            Err(err) => Err(err),
        };
        self.forget_on_error(result)
    }

    async fn request_job(&mut self) -> Result<Assignment> {
        let result = match self.client().await {
            Ok(client) => client
                .assign_job(rpc::Empty {})
                .await
                .map_err(Into::into)
                .and_then(|reply| Assignment::try_from(reply.into_inner())),
            Err(err) => Err(err),
        };
        self.forget_on_error(result)
    }

    async fn report_done(&mut self, report: Report) -> Result<bool> {
        let result = match self.client().await {
            Ok(client) => client
                .report_job_done(rpc::Job::from(report))
                .await
                .map(|reply| reply.into_inner().accepted)
                .map_err(Into::into),
            Err(err) => Err(err),
        };
        self.forget_on_error(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mr::error::Error;

    #[tokio::test]
    async fn test_missing_coordinator_is_a_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = RpcClient::new(dir.path().join("nobody-home"));

        assert!(matches!(
            client.partition_count().await,
            Err(Error::Transport(_))
        ));
        assert!(client.inner.is_none());
        assert!(client.request_job().await.is_err());
    }
}
