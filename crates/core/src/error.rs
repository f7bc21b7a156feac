use thiserror::Error;

/// Top-level error type shared by the runtime, protocol and config crates.
#[derive(Debug, Error)]
pub enum BarError {
    #[error("config error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("module error: {0}")]
    Module(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T, E = BarError> = std::result::Result<T, E>;
