use bar_core::{Module, Segment, Sink};
use futures::future::BoxFuture;

/// Shows a fixed segment forever.
#[derive(Debug, Clone)]
pub struct TextModule {
    segment: Segment,
}

impl TextModule {
    pub fn new(text: impl Into<String>) -> Self {
        Self::from_segment(Segment::text(text))
    }

    pub fn from_segment(segment: Segment) -> Self {
        Self { segment }
    }
}

impl Module for TextModule {
    fn stream(&self, sink: Sink) -> BoxFuture<'static, anyhow::Result<()>> {
        let segment = self.segment.clone();
        Box::pin(async move {
            sink.output(segment);
            // Returning would mark the module finished.
            futures::future::pending::<()>().await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[tokio::test]
    async fn emits_once_and_keeps_running() {
        let (sink, value) = Sink::recording();
        let task = tokio::spawn(TextModule::new("hello").stream(sink));
        tokio::task::yield_now().await;

        let segs = value.get().materialize(UNIX_EPOCH);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].content().as_str(), "hello");
        assert!(!task.is_finished());
        task.abort();
    }
}
