use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reach the coordinator: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("remote call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed intermediate record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown job phase {0}")]
    UnknownPhase(i32),

    #[error("cannot read input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load application: {0}")]
    Plugin(#[from] libloading::Error),

    #[error("unknown application {0:?}")]
    UnknownApplication(String),

    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
