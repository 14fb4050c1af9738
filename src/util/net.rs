use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use nix::unistd::getuid;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::unix::{SocketAddr, UCred};
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::server::Connected;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, warn};

// tonic wants a URI even when the connector ignores it.
const PLACEHOLDER_URI: &str = "http://[::]:50051";

/// coordinator_sock cooks up a unique-ish UNIX-domain socket name
/// in /var/tmp, for the coordinator.
pub fn coordinator_sock() -> PathBuf {
    PathBuf::from(format!("/var/tmp/mrjobs-{}", getuid()))
}

/// An accepted connection on the coordinator socket, in the shape the tonic
/// server wants.
#[derive(Debug)]
pub struct UdsStream(pub UnixStream);

#[derive(Debug, Clone)]
pub struct UdsConnectInfo {
    pub peer_addr: Option<Arc<SocketAddr>>,
    pub peer_cred: Option<UCred>,
}

impl Connected for UdsStream {
    type ConnectInfo = UdsConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        UdsConnectInfo {
            peer_addr: self.0.peer_addr().ok().map(Arc::new),
            peer_cred: self.0.peer_cred().ok(),
        }
    }
}

impl AsyncRead for UdsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UdsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Binds `path`, replacing a socket file left over by an earlier run, and
/// yields the accepted connections.
pub fn listen(path: &Path) -> io::Result<impl Stream<Item = io::Result<UdsStream>>> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "removed stale socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    let listener = UnixListener::bind(path)?;
    Ok(UnixListenerStream::new(listener).map(|conn| conn.map(UdsStream)))
}

pub fn remove_sock(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(socket = %path.display(), %err, "failed to remove socket");
        }
    }
}

/// Opens a channel to the coordinator listening on `path`.
pub async fn connect(path: &Path) -> Result<Channel, tonic::transport::Error> {
    let path = path.to_path_buf();
    Endpoint::from_static(PLACEHOLDER_URI)
        .connect_with_connector(service_fn(move |_: Uri| UnixStream::connect(path.clone())))
        .await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sock_is_per_user() {
        let sock = coordinator_sock();
        let name = sock.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, format!("mrjobs-{}", getuid()));
        assert!(sock.starts_with("/var/tmp"));
    }

    #[tokio::test]
    async fn test_listen_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        std::fs::write(&path, b"left over").unwrap();

        let mut incoming = Box::pin(listen(&path).unwrap());
        assert!(path.exists());

        let _client = UnixStream::connect(&path).await.unwrap();
        let conn = incoming.next().await.unwrap().unwrap();
        let info = conn.connect_info();
        assert_eq!(info.peer_cred.map(|cred| cred.uid()), Some(getuid().as_raw()));
        drop(incoming);
        remove_sock(&path);
        assert!(!path.exists());
        // removing twice is quiet
        remove_sock(&path);
    }
}
