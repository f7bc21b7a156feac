use std::time::Duration;
use tokio::signal::unix::SignalKind;

/// Runtime settings, usually filled from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarOptions {
    /// Announced in the header; receiving it pauses the bar.
    pub stop_signal: i32,
    /// Announced in the header; receiving it resumes the bar.
    pub cont_signal: i32,
    /// Extra time to wait for more updates before writing a line.
    pub debounce: Duration,
    /// Command run by the default error handler, error message appended.
    pub error_command: Vec<String>,
}

impl Default for BarOptions {
    fn default() -> Self {
        Self {
            stop_signal: SignalKind::user_defined1().as_raw_value(),
            cont_signal: SignalKind::user_defined2().as_raw_value(),
            debounce: Duration::ZERO,
            error_command: vec!["i3-nagbar".to_string(), "-m".to_string()],
        }
    }
}
