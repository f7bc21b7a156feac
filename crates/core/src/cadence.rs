//! "When is the next fire?" arithmetic shared by schedulers and timed outputs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How a timer repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fire once at the given time.
    Once(SystemTime),
    /// Fire every `interval`, in phase with `start` (first fire at `start + interval`).
    Every { interval: Duration, start: SystemTime },
    /// Fire at every `k * interval + offset` measured from the Unix epoch.
    Aligned { interval: Duration, offset: Duration },
}

impl Cadence {
    /// The first fire time strictly after `now`, or `None` when a one-shot
    /// deadline has already passed.
    pub fn next_after(&self, now: SystemTime) -> Option<SystemTime> {
        match *self {
            Cadence::Once(at) => (at > now).then_some(at),
            Cadence::Every { interval, start } => Some(next_in_phase(now, start, interval)),
            Cadence::Aligned { interval, offset } => Some(next_aligned(now, interval, offset)),
        }
    }

    pub fn is_periodic(&self) -> bool {
        !matches!(self, Cadence::Once(_))
    }
}

/// The smallest `truncate(now, interval) + offset` strictly after `now`,
/// rolled forward by one interval if needed.
///
/// Panics if `interval` is zero.
pub fn next_aligned(now: SystemTime, interval: Duration, offset: Duration) -> SystemTime {
    assert!(!interval.is_zero(), "aligned interval must be positive");
    let next = truncate(now, interval) + offset;
    if next > now {
        next
    } else {
        next + interval
    }
}

/// Round `t` down to a multiple of `interval` since the Unix epoch.
pub fn truncate(t: SystemTime, interval: Duration) -> SystemTime {
    let since = nanos_since_epoch(t);
    let step = interval.as_nanos();
    UNIX_EPOCH + from_nanos(since - since % step)
}

fn next_in_phase(now: SystemTime, start: SystemTime, interval: Duration) -> SystemTime {
    assert!(!interval.is_zero(), "repeat interval must be positive");
    let Ok(elapsed) = now.duration_since(start) else {
        // `now` is before the phase origin; the first fire is still ahead.
        return start + interval;
    };
    let step = interval.as_nanos();
    let periods = elapsed.as_nanos() / step + 1;
    start + from_nanos(periods * step)
}

fn nanos_since_epoch(t: SystemTime) -> u128 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos()
}

fn from_nanos(n: u128) -> Duration {
    Duration::new((n / 1_000_000_000) as u64, (n % 1_000_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn aligned_on_boundary_rolls_forward() {
        let min = Duration::from_secs(60);
        assert_eq!(next_aligned(at(120), min, Duration::ZERO), at(180));
        assert_eq!(next_aligned(at(121), min, Duration::ZERO), at(180));
    }

    #[test]
    fn aligned_with_offset() {
        let min = Duration::from_secs(60);
        let off = Duration::from_secs(15);
        assert_eq!(next_aligned(at(100), min, off), at(135));
        assert_eq!(next_aligned(at(135), min, off), at(195));
        assert_eq!(next_aligned(at(59), min, off), at(75));
    }

    #[test]
    fn aligned_results_are_multiples() {
        let d = Duration::from_millis(700);
        let off = Duration::from_millis(50);
        let mut t = at(1_000);
        for _ in 0..50 {
            t = next_aligned(t, d, off);
            let n = nanos_since_epoch(t) - off.as_nanos();
            assert_eq!(n % d.as_nanos(), 0);
        }
    }

    #[test]
    fn every_keeps_phase() {
        let c = Cadence::Every {
            interval: Duration::from_secs(10),
            start: at(3),
        };
        assert_eq!(c.next_after(at(3)), Some(at(13)));
        assert_eq!(c.next_after(at(13)), Some(at(23)));
        assert_eq!(c.next_after(at(47)), Some(at(53)));
        assert_eq!(c.next_after(at(0)), Some(at(13)));
    }

    #[test]
    fn once_in_the_past_has_no_next() {
        assert_eq!(Cadence::Once(at(5)).next_after(at(5)), None);
        assert_eq!(Cadence::Once(at(6)).next_after(at(5)), Some(at(6)));
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn zero_interval_panics() {
        next_aligned(at(5), Duration::ZERO, Duration::ZERO);
    }
}
