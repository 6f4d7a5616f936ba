use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlApiError>;

#[derive(Error, Debug)]
pub enum ControlApiError {
    #[error("control socket path {0:?} is a symlink, refusing to bind")]
    SocketPathIsSymlink(std::path::PathBuf),

    #[error("failed to bind control socket at {path:?}: {source}")]
    Bind { path: std::path::PathBuf, #[source] source: std::io::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bus(#[from] sekia_broker::BrokerError),
}
