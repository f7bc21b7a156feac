use crate::scheduler::{SchedInner, Scheduler};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Virtual time starts here on every entry into test mode: a fixed,
/// non-zero instant (2016-11-25 20:47:00 UTC).
pub const TEST_START: Duration = Duration::from_secs(1_480_106_820);

/// A time source plus the schedulers bound to it.
///
/// A real clock follows the system clock and drives schedulers with timers.
/// A test clock only moves when told to ([`Clock::advance_to`],
/// [`Clock::next_tick`]) and fires schedulers synchronously as it passes
/// their deadlines.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    state: Mutex<ClockState>,
}

struct ClockState {
    paused: bool,
    schedulers: Vec<Weak<SchedInner>>,
    virtual_time: Option<VirtualTime>,
}

struct VirtualTime {
    now: SystemTime,
    /// Pending fires ordered by deadline, then by insertion.
    queue: BTreeMap<(SystemTime, u64), Entry>,
    seq: u64,
}

struct Entry {
    sched: Weak<SchedInner>,
    generation: u64,
}

impl Clock {
    pub fn real() -> Self {
        Self::with_state(None)
    }

    pub fn test() -> Self {
        Self::with_state(Some(VirtualTime {
            now: UNIX_EPOCH + TEST_START,
            queue: BTreeMap::new(),
            seq: 0,
        }))
    }

    fn with_state(virtual_time: Option<VirtualTime>) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    paused: false,
                    schedulers: Vec::new(),
                    virtual_time,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_test(&self) -> bool {
        self.lock().virtual_time.is_some()
    }

    pub fn now(&self) -> SystemTime {
        match &self.lock().virtual_time {
            Some(vt) => vt.now,
            None => SystemTime::now(),
        }
    }

    pub fn new_scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone(), false)
    }

    /// A scheduler that fires promptly across system suspend and wall-clock
    /// jumps. Behaves like [`Clock::new_scheduler`] on a test clock.
    pub fn new_realtime_scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone(), true)
    }

    /// Stop all schedulers from firing until [`Clock::resume`]. Idempotent.
    pub fn pause(&self) {
        let mut st = self.lock();
        if !st.paused {
            tracing::debug!("timing paused");
            st.paused = true;
        }
    }

    /// Fire, once, every scheduler whose deadline passed while paused.
    /// Idempotent.
    pub fn resume(&self) {
        let schedulers: Vec<Arc<SchedInner>> = {
            let mut st = self.lock();
            if !st.paused {
                return;
            }
            tracing::debug!("timing resumed");
            st.paused = false;
            st.schedulers.retain(|s| s.strong_count() > 0);
            st.schedulers.iter().filter_map(Weak::upgrade).collect()
        };
        for s in schedulers {
            s.flush_pending();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Fire the earliest pending scheduler, moving virtual time to its
    /// deadline, and return the new time. Returns the current time
    /// unchanged when nothing is scheduled.
    ///
    /// Panics on a real clock.
    pub fn next_tick(&self) -> SystemTime {
        let (now, fired) = {
            let mut st = self.lock();
            let paused = st.paused;
            let vt = virtual_time(&mut st);
            let Some(((when, _), entry)) = vt.queue.pop_first() else {
                return vt.now;
            };
            vt.now = vt.now.max(when);
            let now = vt.now;
            let fired = entry.sched.upgrade().map(|sched| {
                if let Some(next) = sched.next_periodic(entry.generation, when) {
                    vt.push(next, Entry {
                        sched: Arc::downgrade(&sched),
                        generation: entry.generation,
                    });
                }
                (sched, entry.generation, paused)
            });
            (now, fired)
        };
        if let Some((sched, generation, paused)) = fired {
            sched.fire(generation, paused);
        }
        now
    }

    /// Fire every scheduler due at or before `t` in deadline order, then set
    /// virtual time to `t`. Time never moves backwards.
    ///
    /// Panics on a real clock.
    pub fn advance_to(&self, t: SystemTime) -> SystemTime {
        loop {
            let due = {
                let mut st = self.lock();
                let vt = virtual_time(&mut st);
                vt.queue.first_key_value().is_some_and(|((when, _), _)| *when <= t)
            };
            if !due {
                break;
            }
            self.next_tick();
        }
        let mut st = self.lock();
        let vt = virtual_time(&mut st);
        vt.now = vt.now.max(t);
        vt.now
    }

    /// Shorthand for `advance_to(now + d)`.
    pub fn advance_by(&self, d: Duration) -> SystemTime {
        let target = self.now() + d;
        self.advance_to(target)
    }

    pub(crate) fn register(&self, sched: &Arc<SchedInner>) {
        let mut st = self.lock();
        st.schedulers.retain(|s| s.strong_count() > 0);
        st.schedulers.push(Arc::downgrade(sched));
    }

    /// Queue a virtual-time fire for `sched`, replacing any queued one.
    /// Returns `false` on a real clock.
    pub(crate) fn schedule_virtual(
        &self,
        sched: &Arc<SchedInner>,
        when: SystemTime,
        generation: u64,
    ) -> bool {
        let mut st = self.lock();
        let Some(vt) = st.virtual_time.as_mut() else {
            return false;
        };
        vt.remove(sched);
        vt.push(when, Entry {
            sched: Arc::downgrade(sched),
            generation,
        });
        true
    }

    pub(crate) fn unschedule_virtual(&self, sched: &Arc<SchedInner>) {
        if let Some(vt) = self.lock().virtual_time.as_mut() {
            vt.remove(sched);
        }
    }
}

impl VirtualTime {
    fn push(&mut self, when: SystemTime, entry: Entry) {
        self.seq += 1;
        self.queue.insert((when, self.seq), entry);
    }

    fn remove(&mut self, sched: &Arc<SchedInner>) {
        let target = Arc::downgrade(sched);
        self.queue.retain(|_, e| !e.sched.ptr_eq(&target));
    }
}

fn virtual_time(st: &mut ClockState) -> &mut VirtualTime {
    st.virtual_time
        .as_mut()
        .unwrap_or_else(|| panic!("virtual time control used outside test mode"))
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("Clock")
            .field("test", &st.virtual_time.is_some())
            .field("paused", &st.paused)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_fixed_point() {
        let c = Clock::test();
        assert_eq!(c.now(), UNIX_EPOCH + TEST_START);
        assert!(c.is_test());
        assert!(!Clock::real().is_test());
    }

    #[test]
    fn advance_without_schedulers_moves_time() {
        let c = Clock::test();
        let start = c.now();
        assert_eq!(c.advance_by(Duration::from_secs(5)), start + Duration::from_secs(5));
        assert_eq!(c.next_tick(), start + Duration::from_secs(5));
    }

    #[test]
    fn time_never_goes_backwards() {
        let c = Clock::test();
        let start = c.now();
        c.advance_to(start - Duration::from_secs(10));
        assert_eq!(c.now(), start);
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let c = Clock::test();
        c.pause();
        c.pause();
        assert!(c.is_paused());
        c.resume();
        c.resume();
        assert!(!c.is_paused());
    }

    #[test]
    #[should_panic(expected = "outside test mode")]
    fn advancing_real_clock_panics() {
        Clock::real().advance_by(Duration::from_secs(1));
    }
}
