use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetlinkError {
    #[cfg(target_os = "linux")]
    #[error("netlink socket: {0}")]
    Nix(#[from] nix::Error),

    #[error("truncated netlink message: {0}")]
    Truncated(String),
}

pub type Result<T> = std::result::Result<T, NetlinkError>;
