use crate::{cadence::Cadence, group::SegmentGroup, segment::Segment};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Everything a module can hand to its sink.
///
/// Each variant materializes to an ordered list of segments; timed variants
/// additionally report when they next need to be re-materialized.
#[derive(Debug, Clone, Default)]
pub enum Output {
    /// Nothing to show.
    #[default]
    Empty,
    Segment(Segment),
    Group(SegmentGroup),
    Timed(TimedOutput),
}

impl Output {
    /// Canonical error output for `err`.
    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        Output::Segment(Segment::error(err))
    }

    /// The segments to display at `now`.
    pub fn materialize(&self, now: SystemTime) -> Vec<Segment> {
        match self {
            Output::Empty => Vec::new(),
            Output::Segment(s) => vec![s.clone()],
            Output::Group(g) => g.materialize(now),
            Output::Timed(t) => t.render(now).materialize(now),
        }
    }

    /// When this output should be re-materialized, or `None` if never.
    pub fn next_refresh(&self, now: SystemTime) -> Option<SystemTime> {
        match self {
            Output::Empty | Output::Segment(_) => None,
            Output::Group(g) => g.next_refresh(now),
            Output::Timed(t) => t.next_refresh(now),
        }
    }
}

impl From<Segment> for Output {
    fn from(s: Segment) -> Self {
        Output::Segment(s)
    }
}

impl From<SegmentGroup> for Output {
    fn from(g: SegmentGroup) -> Self {
        Output::Group(g)
    }
}

impl From<TimedOutput> for Output {
    fn from(t: TimedOutput) -> Self {
        Output::Timed(t)
    }
}

impl<T: Into<Output>> From<Option<T>> for Output {
    fn from(o: Option<T>) -> Self {
        o.map_or(Output::Empty, Into::into)
    }
}

type RenderFn = Arc<dyn Fn(SystemTime) -> Output + Send + Sync>;

/// An output recomputed from the current time on a schedule, e.g. a
/// countdown or a clock.
#[derive(Clone)]
pub struct TimedOutput {
    render: RenderFn,
    cadence: Option<Cadence>,
}

impl TimedOutput {
    /// Build from a render function; call one of [`every`](Self::every),
    /// [`every_align`](Self::every_align) or [`at`](Self::at) to schedule
    /// refreshes. Without one it renders once and never refreshes.
    pub fn repeat(render: impl Fn(SystemTime) -> Output + Send + Sync + 'static) -> Self {
        Self {
            render: Arc::new(render),
            cadence: None,
        }
    }

    /// Refresh every `interval`, in phase with `start`.
    ///
    /// Panics if `interval` is zero.
    #[must_use]
    pub fn every(mut self, interval: Duration, start: SystemTime) -> Self {
        assert!(!interval.is_zero(), "TimedOutput::every: interval must be positive");
        self.cadence = Some(Cadence::Every { interval, start });
        self
    }

    /// Refresh at every multiple of `interval` plus `offset`.
    #[must_use]
    pub fn every_align(mut self, interval: Duration, offset: Duration) -> Self {
        assert!(!interval.is_zero(), "TimedOutput::every_align: interval must be positive");
        self.cadence = Some(Cadence::Aligned { interval, offset });
        self
    }

    /// Refresh once, at `at`.
    #[must_use]
    pub fn at(mut self, at: SystemTime) -> Self {
        self.cadence = Some(Cadence::Once(at));
        self
    }

    pub fn render(&self, now: SystemTime) -> Output {
        (self.render)(now)
    }

    pub fn next_refresh(&self, now: SystemTime) -> Option<SystemTime> {
        self.cadence.and_then(|c| c.next_after(now))
    }
}

impl fmt::Debug for TimedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedOutput")
            .field("cadence", &self.cadence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn timed_output_renders_from_now() {
        let deadline = at(100);
        let countdown = TimedOutput::repeat(move |now| {
            let left = deadline.duration_since(now).unwrap_or_default().as_secs();
            Segment::text(format!("{left}s")).into()
        })
        .every(Duration::from_secs(1), at(0));

        let out = Output::from(countdown);
        assert_eq!(out.materialize(at(90))[0].content().as_str(), "10s");
        assert_eq!(out.next_refresh(at(90)), Some(at(91)));
    }

    #[test]
    fn once_refresh_expires() {
        let t = TimedOutput::repeat(|_| Output::Empty).at(at(10));
        assert_eq!(t.next_refresh(at(5)), Some(at(10)));
        assert_eq!(t.next_refresh(at(10)), None);
    }

    #[test]
    fn static_outputs_never_refresh() {
        assert_eq!(Output::from(Segment::text("x")).next_refresh(at(0)), None);
        assert_eq!(TimedOutput::repeat(|_| Output::Empty).next_refresh(at(0)), None);
    }

    #[test]
    fn group_refresh_is_earliest_child() {
        let g = SegmentGroup::new()
            .with(TimedOutput::repeat(|_| Output::Empty).at(at(30)))
            .with(Segment::text("static"))
            .with(TimedOutput::repeat(|_| Output::Empty).at(at(20)));
        assert_eq!(Output::from(g).next_refresh(at(0)), Some(at(20)));
    }

    #[test]
    fn none_is_empty() {
        let o: Output = None::<Segment>.into();
        assert!(o.materialize(at(0)).is_empty());
    }
}
