use crate::clock::Clock;
use bar_core::{notifier, Cadence, Listener, Notifier, TryNotified};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

/// Handle for one logical timer.
///
/// A scheduler holds at most one arming at a time: a single deadline
/// ([`at`](Self::at), [`after`](Self::after)), a fixed period
/// ([`every`](Self::every)) or a calendar-aligned period
/// ([`every_align`](Self::every_align)). Arming again replaces whatever was
/// pending. Each fire delivers one coalesced tick, read with
/// [`tick`](Self::tick) or [`try_tick`](Self::try_tick).
///
/// Schedulers never fire while their clock is paused; a scheduler whose
/// deadline passed during the pause fires exactly once on resume.
pub struct Scheduler {
    inner: Arc<SchedInner>,
    ticks: Listener,
}

pub(crate) struct SchedInner {
    clock: Clock,
    realtime: bool,
    notifier: Notifier,
    state: Mutex<SchedState>,
}

#[derive(Default)]
struct SchedState {
    cadence: Option<Cadence>,
    generation: u64,
    pending: bool,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) fn new(clock: Clock, realtime: bool) -> Self {
        let (notifier, ticks) = notifier();
        let inner = Arc::new(SchedInner {
            clock: clock.clone(),
            realtime,
            notifier,
            state: Mutex::new(SchedState::default()),
        });
        clock.register(&inner);
        Self { inner, ticks }
    }

    /// Fire once at `t`; immediately if `t` is not in the future.
    pub fn at(&self, t: SystemTime) -> &Self {
        self.inner.arm(Cadence::Once(t));
        self
    }

    /// Fire once after `d`; immediately if `d` is zero.
    pub fn after(&self, d: Duration) -> &Self {
        let now = self.inner.clock.now();
        self.inner.arm(Cadence::Once(now + d));
        self
    }

    /// Fire every `d`, starting at `now + d`.
    ///
    /// Panics if `d` is zero.
    pub fn every(&self, d: Duration) -> &Self {
        assert!(!d.is_zero(), "Scheduler::every: interval must be positive");
        let start = self.inner.clock.now();
        self.inner.arm(Cadence::Every { interval: d, start });
        self
    }

    /// Fire at every `k * d + offset` after now, measured from the epoch.
    ///
    /// Panics if `d` is zero.
    pub fn every_align(&self, d: Duration, offset: Duration) -> &Self {
        assert!(!d.is_zero(), "Scheduler::every_align: interval must be positive");
        self.inner.arm(Cadence::Aligned { interval: d, offset });
        self
    }

    /// Cancel any pending fire, including one deferred by a pause.
    pub fn stop(&self) {
        self.inner.disarm();
    }

    /// Stop and release the scheduler.
    pub fn close(self) {}

    /// Wait for the next fire. Fires that happened since the last call are
    /// coalesced into one.
    pub async fn tick(&mut self) {
        // The notifier lives in `inner`, which we own, so the channel never closes.
        self.ticks.notified().await;
    }

    /// Consume a pending fire without waiting.
    pub fn try_tick(&mut self) -> bool {
        self.ticks.try_notified() == TryNotified::Notified
    }

    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.disarm();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("Scheduler")
            .field("cadence", &st.cadence)
            .field("realtime", &self.inner.realtime)
            .finish()
    }
}

impl SchedInner {
    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(self: &Arc<Self>, cadence: Cadence) {
        let generation = {
            let mut st = self.lock();
            st.generation += 1;
            st.pending = false;
            st.cadence = Some(cadence);
            if let Some(task) = st.task.take() {
                task.abort();
            }
            st.generation
        };

        let now = self.clock.now();
        let Some(first) = cadence.next_after(now) else {
            // One-shot deadline already passed.
            self.fire(generation, self.clock.is_paused());
            return;
        };

        if self.clock.schedule_virtual(self, first, generation) {
            return;
        }
        self.spawn_timer(cadence, first, generation);
    }

    fn disarm(self: &Arc<Self>) {
        {
            let mut st = self.lock();
            st.generation += 1;
            st.pending = false;
            st.cadence = None;
            if let Some(task) = st.task.take() {
                task.abort();
            }
        }
        self.clock.unschedule_virtual(self);
    }

    /// Deliver a fire for `generation`, or defer it to resume when paused.
    pub(crate) fn fire(&self, generation: u64, paused: bool) {
        {
            let mut st = self.lock();
            if st.generation != generation {
                return;
            }
            if paused {
                st.pending = true;
                return;
            }
        }
        self.notifier.notify();
    }

    pub(crate) fn flush_pending(&self) {
        let pending = std::mem::take(&mut self.lock().pending);
        if pending {
            self.notifier.notify();
        }
    }

    /// For a periodic arming still current at `generation`, the fire after `when`.
    pub(crate) fn next_periodic(&self, generation: u64, when: SystemTime) -> Option<SystemTime> {
        let st = self.lock();
        if st.generation != generation {
            return None;
        }
        st.cadence
            .filter(Cadence::is_periodic)
            .and_then(|c| c.next_after(when))
    }

    fn spawn_timer(self: &Arc<Self>, cadence: Cadence, first: SystemTime, generation: u64) {
        let weak = Arc::downgrade(self);
        let realtime = self.realtime;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn(run_timer(weak, cadence, first, generation, realtime));
                let mut st = self.lock();
                if st.generation == generation {
                    st.task = Some(task);
                } else {
                    task.abort();
                }
            }
            Err(_) => {
                // No runtime on this thread; a plain thread keeps the contract.
                let spawned = std::thread::Builder::new()
                    .name("bar-timer".into())
                    .spawn(move || run_timer_blocking(weak, cadence, first, generation));
                if let Err(e) = spawned {
                    tracing::error!("failed to spawn timer thread: {e}");
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }
}

/// What woke a timer.
pub(crate) enum Wake {
    Deadline,
    /// The wall clock jumped (settimeofday, resume from suspend).
    ClockChanged,
}

async fn run_timer(
    sched: Weak<SchedInner>,
    cadence: Cadence,
    first: SystemTime,
    generation: u64,
    realtime: bool,
) {
    let mut deadline = first;
    loop {
        let wake = if realtime {
            crate::realtime::wait_until(deadline).await
        } else {
            tokio::time::sleep(until(deadline)).await;
            Wake::Deadline
        };

        let Some(s) = sched.upgrade() else { return };
        let now = SystemTime::now();
        match wake {
            Wake::Deadline => s.fire(generation, s.clock.is_paused()),
            Wake::ClockChanged if cadence.is_periodic() || now >= deadline => {
                s.fire(generation, s.clock.is_paused());
            }
            Wake::ClockChanged => continue,
        }
        match cadence.next_after(now.max(deadline)) {
            Some(next) => deadline = next,
            None => return,
        }
    }
}

fn run_timer_blocking(sched: Weak<SchedInner>, cadence: Cadence, first: SystemTime, generation: u64) {
    let mut deadline = first;
    loop {
        std::thread::sleep(until(deadline));
        let Some(s) = sched.upgrade() else { return };
        if !s.is_current(generation) {
            return;
        }
        s.fire(generation, s.clock.is_paused());
        match cadence.next_after(SystemTime::now().max(deadline)) {
            Some(next) => deadline = next,
            None => return,
        }
    }
}

fn until(deadline: SystemTime) -> Duration {
    deadline.duration_since(SystemTime::now()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn after_fires_once_at_deadline() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.after(secs(10));
        clock.advance_by(secs(9));
        assert!(!s.try_tick());
        clock.advance_by(secs(1));
        assert!(s.try_tick());
        clock.advance_by(secs(100));
        assert!(!s.try_tick());
    }

    #[test]
    fn past_deadlines_fire_immediately() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.at(clock.now());
        assert!(s.try_tick());
        s.after(Duration::ZERO);
        assert!(s.try_tick());
        s.at(clock.now() - secs(60));
        assert!(s.try_tick());
    }

    #[test]
    fn rearming_replaces_pending_fire() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.after(secs(5));
        s.after(secs(20));
        clock.advance_by(secs(10));
        assert!(!s.try_tick());
        clock.advance_by(secs(10));
        assert!(s.try_tick());
    }

    #[test]
    fn stop_cancels() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.every(secs(1));
        s.stop();
        clock.advance_by(secs(10));
        assert!(!s.try_tick());
    }

    #[test]
    fn every_fires_on_phase() {
        let clock = Clock::test();
        let start = clock.now();
        let mut s = clock.new_scheduler();
        s.every(secs(3));
        assert_eq!(clock.next_tick(), start + secs(3));
        assert!(s.try_tick());
        assert_eq!(clock.next_tick(), start + secs(6));
        assert!(s.try_tick());
    }

    #[test]
    fn every_align_fires_on_multiples() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.every_align(secs(7), secs(2));
        for _ in 0..5 {
            let t = clock.next_tick();
            assert!(s.try_tick());
            let since = t.duration_since(std::time::UNIX_EPOCH).unwrap() - secs(2);
            assert_eq!(since.as_secs() % 7, 0);
            assert_eq!(since.subsec_nanos(), 0);
        }
    }

    #[test]
    fn paused_scheduler_fires_once_on_resume() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.every(secs(1));
        clock.pause();
        clock.advance_by(secs(30));
        assert!(!s.try_tick());
        clock.resume();
        assert!(s.try_tick());
        assert!(!s.try_tick());
    }

    #[test]
    fn resume_without_missed_deadline_does_not_fire() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.after(secs(60));
        clock.pause();
        clock.advance_by(secs(30));
        clock.resume();
        assert!(!s.try_tick());
        clock.advance_by(secs(30));
        assert!(s.try_tick());
    }

    #[test]
    fn immediate_fire_while_paused_waits_for_resume() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        clock.pause();
        s.after(Duration::ZERO);
        assert!(!s.try_tick());
        clock.resume();
        assert!(s.try_tick());
    }

    #[test]
    fn stop_discards_fire_deferred_by_pause() {
        let clock = Clock::test();
        let mut s = clock.new_scheduler();
        s.after(secs(1));
        clock.pause();
        clock.advance_by(secs(2));
        s.stop();
        clock.resume();
        assert!(!s.try_tick());
    }

    #[test]
    fn dropped_scheduler_leaves_queue() {
        let clock = Clock::test();
        let start = clock.now();
        let s = clock.new_scheduler();
        s.after(secs(5));
        drop(s);
        assert_eq!(clock.next_tick(), start);
    }

    #[test]
    #[should_panic(expected = "interval must be positive")]
    fn every_zero_is_misuse() {
        Clock::test().new_scheduler().every(Duration::ZERO);
    }

    #[tokio::test]
    async fn real_clock_after_fires() {
        let clock = Clock::real();
        let mut s = clock.new_scheduler();
        s.after(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(5), s.tick())
            .await
            .expect("scheduler did not fire");
    }

    #[tokio::test]
    async fn real_clock_pause_defers_fire() {
        let clock = Clock::real();
        let mut s = clock.new_scheduler();
        clock.pause();
        s.after(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!s.try_tick());
        clock.resume();
        assert!(s.try_tick());
    }
}
