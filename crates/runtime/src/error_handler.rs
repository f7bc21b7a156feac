//! The process-wide hook told about module errors.

use std::sync::{Arc, LazyLock, RwLock};
use tracing::{info, warn};

/// What brought an error to the handler's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTrigger {
    /// The module's stream returned an error or panicked.
    Terminated,
    /// The user right-clicked the error segment.
    Clicked,
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Position of the module on the bar.
    pub slot: usize,
    pub error: Arc<anyhow::Error>,
    pub trigger: ErrorTrigger,
    /// Command the default handler runs, message appended.
    pub command: Vec<String>,
}

type Handler = Arc<dyn Fn(&ErrorReport) + Send + Sync>;

static HANDLER: LazyLock<RwLock<Option<Handler>>> = LazyLock::new(|| RwLock::new(None));

/// Replace the default handler for every bar in the process.
pub fn set_error_handler(handler: impl Fn(&ErrorReport) + Send + Sync + 'static) {
    *HANDLER.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
}

/// Go back to the default handler.
pub fn reset_error_handler() {
    *HANDLER.write().unwrap_or_else(|e| e.into_inner()) = None;
}

pub(crate) fn report(report: ErrorReport) {
    let handler = HANDLER.read().unwrap_or_else(|e| e.into_inner()).clone();
    match handler {
        Some(handler) => handler(&report),
        None => default_handler(&report),
    }
}

/// Shows clicked errors with the configured command. Terminations are only
/// logged; the error segment is already on the bar.
fn default_handler(report: &ErrorReport) {
    if report.trigger != ErrorTrigger::Clicked {
        return;
    }
    let Some((program, args)) = report.command.split_first() else {
        info!(slot = report.slot, "module error: {:#}", report.error);
        return;
    };
    let spawned = tokio::process::Command::new(program)
        .args(args)
        .arg(format!("{:#}", report.error))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .kill_on_drop(false)
        .spawn();
    match spawned {
        Ok(mut child) => {
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
        Err(e) => warn!("cannot run error command {program:?}: {e}"),
    }
}
