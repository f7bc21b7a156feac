//! Re-materializing timed outputs when they ask for it.

use crate::engine::Msg;
use bar_timing::Scheduler;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Arms one scheduler per slot on behalf of the bar loop.
pub(crate) struct Refresher {
    arm: mpsc::UnboundedSender<Option<SystemTime>>,
    armed: Option<SystemTime>,
}

impl Refresher {
    /// Must be called on the bar loop's thread so the scheduler binds to
    /// the same clock.
    pub fn spawn(slot: usize, tx: mpsc::UnboundedSender<Msg>) -> Self {
        let (arm, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(slot, bar_timing::new_scheduler(), rx, tx));
        Self { arm, armed: None }
    }

    /// Fire at `at`, or never for `None`. Re-arming for the same time is a
    /// no-op.
    pub fn set(&mut self, at: Option<SystemTime>) {
        if self.armed != at {
            self.armed = at;
            let _ = self.arm.send(at);
        }
    }

    /// Forget the armed time after it fired.
    pub fn fired(&mut self) {
        self.armed = None;
    }
}

async fn run(
    slot: usize,
    mut sch: Scheduler,
    mut arm: mpsc::UnboundedReceiver<Option<SystemTime>>,
    tx: mpsc::UnboundedSender<Msg>,
) {
    loop {
        tokio::select! {
            cmd = arm.recv() => match cmd {
                Some(Some(at)) => {
                    sch.at(at);
                }
                Some(None) => sch.stop(),
                None => break,
            },
            _ = sch.tick() => {
                if tx.send(Msg::Refresh { slot }).is_err() {
                    break;
                }
            }
        }
    }
}
