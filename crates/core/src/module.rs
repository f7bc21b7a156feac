use crate::{event::Event, output::Output, value::Value};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A producer of output for one area of the bar.
///
/// The runtime calls [`Module::stream`] once at start and again every time
/// the module is restarted after terminating. The returned future runs as
/// its own task and pushes outputs into `sink` for as long as it likes;
/// returning `Err` (or panicking) turns the module's area into an error
/// segment that restarts the module when clicked.
pub trait Module: Send + Sync + 'static {
    fn stream(&self, sink: Sink) -> BoxFuture<'static, anyhow::Result<()>>;

    /// Fallback click handler for segments without their own handler.
    fn on_click(&self, _event: &Event) {}
}

/// Handle a module uses to publish its output. Cheap to clone.
///
/// Each call replaces the module's previous output entirely.
#[derive(Clone)]
pub struct Sink {
    publish: Arc<dyn Fn(Output) + Send + Sync>,
}

impl Sink {
    pub fn new(publish: impl Fn(Output) + Send + Sync + 'static) -> Self {
        Self {
            publish: Arc::new(publish),
        }
    }

    /// A sink that records the latest output into a [`Value`], for tests.
    pub fn recording() -> (Self, Value<Output>) {
        let value = Value::new(Output::Empty);
        let recorder = value.clone();
        (Self::new(move |o| recorder.set(o)), value)
    }

    pub fn output(&self, output: impl Into<Output>) {
        (self.publish)(output.into());
    }

    /// Replace the output with the canonical error segment for `err`.
    pub fn error(&self, err: impl Into<anyhow::Error>) {
        self.output(Output::error(err));
    }

    /// Show nothing.
    pub fn clear(&self) {
        self.output(Output::Empty);
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use std::time::UNIX_EPOCH;

    #[test]
    fn recording_sink_keeps_latest() {
        let (sink, value) = Sink::recording();
        sink.output(Segment::text("one"));
        sink.output(Segment::text("two"));
        let segs = value.get().materialize(UNIX_EPOCH);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].content().as_str(), "two");

        sink.error(anyhow::anyhow!("bad"));
        assert!(value.get().materialize(UNIX_EPOCH)[0].get_error().is_some());

        sink.clear();
        assert!(value.get().materialize(UNIX_EPOCH).is_empty());
    }
}
