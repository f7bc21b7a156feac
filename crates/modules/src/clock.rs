use anyhow::bail;
use bar_core::{Module, Output, Segment, Sink, TimedOutput};
use chrono::format::{Item, StrftimeItems};
use futures::future::BoxFuture;
use std::time::{Duration, SystemTime};

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Displays the local time with a `chrono` format string.
///
/// Refreshes on every minute boundary, or every second when the format
/// shows seconds.
#[derive(Debug, Clone)]
pub struct ClockModule {
    format: String,
}

impl Default for ClockModule {
    fn default() -> Self {
        Self::new(DEFAULT_FORMAT)
    }
}

impl ClockModule {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Like [`new`](Self::new), rejecting formats `chrono` cannot render.
    pub fn parse(format: &str) -> anyhow::Result<Self> {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            bail!("invalid clock format {format:?}");
        }
        Ok(Self::new(format))
    }

    fn step(&self) -> Duration {
        if ["%S", "%T", "%s", "%X"].iter().any(|s| self.format.contains(s)) {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(60)
        }
    }

    fn output(&self) -> TimedOutput {
        let format = self.format.clone();
        TimedOutput::repeat(move |now| render(&format, now)).every_align(self.step(), Duration::ZERO)
    }
}

fn render(format: &str, now: SystemTime) -> Output {
    let local = bar_timing::local_time(now);
    Segment::text(local.format(format).to_string()).into()
}

impl Module for ClockModule {
    fn stream(&self, sink: Sink) -> BoxFuture<'static, anyhow::Result<()>> {
        let output = self.output();
        Box::pin(async move {
            sink.output(output);
            futures::future::pending::<()>().await;
            Ok(())
        })
    }
}
