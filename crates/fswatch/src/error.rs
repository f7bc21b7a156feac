use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("file watcher: {0}")]
    Notify(#[from] notify::Error),

    #[error("file watcher I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = WatchError> = std::result::Result<T, E>;
