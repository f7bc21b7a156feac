use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbusError {
    /// The target has no owner on the bus (yet, or any more).
    #[error("disconnected: {0} has no owner")]
    Disconnected(String),

    /// The remote side answered with a D-Bus error.
    #[error("{name}: {message}")]
    Method { name: String, message: String },

    #[error("invalid match rule: {0}")]
    InvalidMatch(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unexpected reply from {method}: {reason}")]
    BadReply { method: String, reason: String },

    #[error("D-Bus error: {0}")]
    Zbus(#[from] zbus::Error),
}

impl DbusError {
    pub fn method(name: impl Into<String>, message: impl Into<String>) -> Self {
        DbusError::Method {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The D-Bus error name, for errors returned by the remote side.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            DbusError::Method { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub type Result<T, E = DbusError> = std::result::Result<T, E>;
