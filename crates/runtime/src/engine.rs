//! The single task that owns the status line.

use crate::error_handler::{self, ErrorReport, ErrorTrigger};
use crate::ids::{instances, slot_name, IdTable, Target};
use crate::options::BarOptions;
use crate::refresh::Refresher;
use crate::slot::{ModuleState, Slot};
use bar_core::{Button, Module, Output, Result};
use bar_protocol::{Block, Click, Header, LineWriter};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) enum Msg {
    Output {
        slot: usize,
        generation: u64,
        output: Output,
    },
    Finished {
        slot: usize,
        generation: u64,
        outcome: std::result::Result<(), Arc<anyhow::Error>>,
    },
    Refresh {
        slot: usize,
    },
    Click(Click),
    Pause,
    Resume,
}

pub(crate) struct Engine<W> {
    slots: Vec<Slot>,
    refreshers: Vec<Refresher>,
    ids: IdTable,
    writer: LineWriter<W>,
    options: BarOptions,
    tx: mpsc::UnboundedSender<Msg>,
    rx: mpsc::UnboundedReceiver<Msg>,
    cancel: CancellationToken,
    paused: bool,
    dirty: bool,
    /// Bumped on every change to any slot.
    version: u64,
}

impl<W: AsyncWrite + Unpin> Engine<W> {
    /// Must be called on the thread whose clock the bar should follow.
    pub fn new(
        modules: Vec<Arc<dyn Module>>,
        options: BarOptions,
        out: W,
        tx: mpsc::UnboundedSender<Msg>,
        rx: mpsc::UnboundedReceiver<Msg>,
        cancel: CancellationToken,
    ) -> Self {
        let slots: Vec<Slot> = modules
            .into_iter()
            .enumerate()
            .map(|(i, m)| Slot::new(i, m, &cancel))
            .collect();
        let refreshers = (0..slots.len()).map(|i| Refresher::spawn(i, tx.clone())).collect();
        Self {
            slots,
            refreshers,
            ids: IdTable::default(),
            writer: LineWriter::new(out),
            options,
            tx,
            rx,
            cancel,
            paused: false,
            dirty: false,
            version: 0,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let header = Header::new(self.options.stop_signal, self.options.cont_signal);
        self.writer.header(&header).await?;
        info!(modules = self.slots.len(), "bar started");
        for slot in &mut self.slots {
            slot.start(&self.cancel, &self.tx);
        }

        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.handle(msg);

            // Collect whatever else became ready in the same round.
            tokio::task::yield_now().await;
            self.drain();
            if self.dirty && !self.paused && !self.options.debounce.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.options.debounce) => {}
                }
                self.drain();
            }
            self.flush().await?;
        }

        self.shutdown().await
    }

    fn drain(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg);
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Output {
                slot,
                generation,
                output,
            } => {
                if self.slots[slot].generation != generation {
                    return;
                }
                self.slots[slot].output = output;
                self.changed(slot);
            }
            Msg::Finished {
                slot,
                generation,
                outcome,
            } => {
                if self.slots[slot].generation != generation {
                    return;
                }
                if let Err(e) = &outcome {
                    error_handler::report(self.report(slot, e.clone(), ErrorTrigger::Terminated));
                }
                self.slots[slot].finish(outcome);
                self.changed(slot);
            }
            Msg::Refresh { slot } => {
                self.refreshers[slot].fired();
                self.changed(slot);
            }
            Msg::Click(click) => self.dispatch(click),
            Msg::Pause => {
                if !self.paused {
                    info!("bar paused");
                    self.paused = true;
                    bar_timing::pause();
                }
            }
            Msg::Resume => {
                if self.paused {
                    info!("bar resumed");
                    self.paused = false;
                    bar_timing::resume();
                    self.dirty = true;
                }
            }
        }
    }

    /// Mark `slot` changed and re-arm its refresh.
    fn changed(&mut self, slot: usize) {
        self.version += 1;
        self.dirty = true;
        let next = self.slots[slot].output.next_refresh(bar_timing::now());
        self.refreshers[slot].set(next);
    }

    fn report(&self, slot: usize, error: Arc<anyhow::Error>, trigger: ErrorTrigger) -> ErrorReport {
        ErrorReport {
            slot,
            error,
            trigger,
            command: self.options.error_command.clone(),
        }
    }

    // ── Emission ─────────────────────────────────────────────────────────────

    async fn flush(&mut self) -> Result<()> {
        if !self.dirty || self.paused {
            return Ok(());
        }
        self.dirty = false;

        let now = bar_timing::now();
        let mut blocks = Vec::new();
        let mut targets = HashMap::new();
        for slot in &self.slots {
            let segments = slot.output.materialize(now);
            let name = slot_name(slot.index);
            for (segment, instance) in segments.iter().zip(instances(&segments)) {
                blocks.push(Block::from_segment(segment, name.clone(), instance.clone()));
                targets.insert(
                    (name.clone(), instance),
                    Target {
                        slot: slot.index,
                        segment: segment.clone(),
                    },
                );
            }
        }
        debug!(version = self.version, blocks = blocks.len(), "writing status line");
        self.writer.line(&blocks).await?;
        self.ids.replace(targets);
        Ok(())
    }

    // ── Clicks ───────────────────────────────────────────────────────────────

    fn dispatch(&mut self, click: Click) {
        let Some(target) = self.ids.get(&click.name, &click.instance).cloned() else {
            debug!(name = %click.name, instance = %click.instance, "click on unknown block");
            return;
        };
        let mut event = click.event;
        event.segment_id = target
            .segment
            .get_identifier()
            .unwrap_or(&click.instance)
            .to_string();

        let slot = &self.slots[target.slot];
        let slot_error = match &slot.state {
            ModuleState::Failed(e) => Some(e.clone()),
            _ => None,
        };
        let error = target.segment.get_error().cloned().or(slot_error);
        let terminated = slot.state.is_terminated();

        if terminated || (error.is_some() && target.segment.click_handler().is_none()) {
            match (event.button, error) {
                (Button::Right, Some(error)) => {
                    error_handler::report(self.report(target.slot, error, ErrorTrigger::Clicked));
                }
                (Button::Left, _) => self.restart(target.slot),
                _ => {}
            }
            return;
        }

        let delivered = match target.segment.click_handler() {
            Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(&event))),
            None => {
                let module = slot.module.clone();
                catch_unwind(AssertUnwindSafe(|| module.on_click(&event)))
            }
        };
        if delivered.is_err() {
            warn!(slot = target.slot, "click handler panicked");
        }
    }

    fn restart(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if matches!(slot.state, ModuleState::Failed(_)) {
            slot.output = Output::Empty;
        }
        slot.start(&self.cancel, &self.tx);
        self.changed(index);
    }

    async fn shutdown(mut self) -> Result<()> {
        info!("bar shutting down");
        for slot in &self.slots {
            slot.stop();
        }
        // Outputs sent before the modules stopped still count.
        while let Ok(msg) = self.rx.try_recv() {
            if let Msg::Output { .. } = msg {
                self.handle(msg);
            }
        }
        self.flush().await?;
        self.writer.finish().await
    }
}
