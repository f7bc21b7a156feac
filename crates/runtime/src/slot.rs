//! One module's place on the bar and the task running it.

use crate::engine::Msg;
use bar_core::{Module, Output, Segment, Sink};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lifecycle of the module in a slot.
#[derive(Debug, Clone)]
pub enum ModuleState {
    Running,
    /// The stream returned `Ok`. The last output stays up.
    Finished,
    /// The stream returned an error or panicked.
    Failed(Arc<anyhow::Error>),
}

impl ModuleState {
    pub fn is_terminated(&self) -> bool {
        !matches!(self, ModuleState::Running)
    }
}

pub(crate) struct Slot {
    pub index: usize,
    pub module: Arc<dyn Module>,
    pub state: ModuleState,
    pub output: Output,
    /// Bumped on every (re)start; messages from older runs are ignored.
    pub generation: u64,
    cancel: CancellationToken,
}

impl Slot {
    pub fn new(index: usize, module: Arc<dyn Module>, parent: &CancellationToken) -> Self {
        Self {
            index,
            module,
            state: ModuleState::Running,
            output: Output::Empty,
            generation: 0,
            cancel: parent.child_token(),
        }
    }

    /// Start (or restart) the module, superseding any previous run.
    pub fn start(&mut self, parent: &CancellationToken, tx: &mpsc::UnboundedSender<Msg>) {
        self.cancel.cancel();
        self.cancel = parent.child_token();
        self.generation += 1;
        self.state = ModuleState::Running;
        if self.generation > 1 {
            info!(slot = self.index, "restarting module");
        }

        let (slot, generation) = (self.index, self.generation);
        let sink_tx = tx.clone();
        let sink = Sink::new(move |output| {
            let _ = sink_tx.send(Msg::Output {
                slot,
                generation,
                output,
            });
        });
        let stream = self.module.stream(sink);
        let cancel = self.cancel.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let mut task = tokio::spawn(stream);
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    task.abort();
                    return;
                }
                joined = &mut task => joined,
            };
            let outcome = match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Arc::new(e)),
                Err(e) if e.is_panic() => Err(Arc::new(anyhow::anyhow!(
                    "module panicked: {}",
                    panic_message(e.into_panic())
                ))),
                Err(_) => return,
            };
            let _ = tx.send(Msg::Finished {
                slot,
                generation,
                outcome,
            });
        });
    }

    /// Record how the current run ended.
    pub fn finish(&mut self, outcome: Result<(), Arc<anyhow::Error>>) {
        match outcome {
            Ok(()) => {
                info!(slot = self.index, "module finished");
                self.state = ModuleState::Finished;
            }
            Err(e) => {
                error!(slot = self.index, "module failed: {e:#}");
                self.output = Segment::text("Error").with_error(e.clone()).into();
                self.state = ModuleState::Failed(e);
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }

    #[test]
    fn failure_shows_error_segment() {
        struct Idle;
        impl Module for Idle {
            fn stream(&self, _sink: Sink) -> futures::future::BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(futures::future::pending())
            }
        }
        let mut slot = Slot::new(3, Arc::new(Idle), &CancellationToken::new());
        slot.finish(Err(Arc::new(anyhow::anyhow!("no battery"))));
        assert!(slot.state.is_terminated());
        let segs = slot.output.materialize(std::time::UNIX_EPOCH);
        assert_eq!(segs[0].content().as_str(), "Error");
        assert_eq!(segs[0].get_error().unwrap().to_string(), "no battery");
    }
}
