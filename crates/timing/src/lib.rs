//! Time for the bar: a swappable clock, schedulers bound to it, and
//! bar-wide pause/resume.
//!
//! The free functions operate on the *current* clock. That is the process
//! real-time clock, unless [`test_mode`] installed a virtual clock on the
//! calling thread; tests therefore never share virtual time even when the
//! test harness runs them in parallel.
//!
//! ```no_run
//! # async fn demo() {
//! let mut sch = bar_timing::new_scheduler();
//! sch.every_align(std::time::Duration::from_secs(60), std::time::Duration::ZERO);
//! loop {
//!     sch.tick().await;
//!     // redraw the clock, exactly on the minute
//! }
//! # }
//! ```

mod clock;
mod realtime;
mod scheduler;
mod zone;

pub use clock::{Clock, TEST_START};
pub use scheduler::Scheduler;
pub use zone::{local_offset, local_time};

use std::cell::RefCell;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

static REAL: LazyLock<Clock> = LazyLock::new(Clock::real);

thread_local! {
    static TEST_CLOCK: RefCell<Option<Clock>> = const { RefCell::new(None) };
}

/// The clock the free functions on this thread operate on.
pub fn clock() -> Clock {
    TEST_CLOCK
        .with(|c| c.borrow().clone())
        .unwrap_or_else(|| REAL.clone())
}

pub fn now() -> SystemTime {
    clock().now()
}

pub fn new_scheduler() -> Scheduler {
    clock().new_scheduler()
}

pub fn new_realtime_scheduler() -> Scheduler {
    clock().new_realtime_scheduler()
}

pub fn pause() {
    clock().pause();
}

pub fn resume() {
    clock().resume();
}

pub fn is_paused() -> bool {
    clock().is_paused()
}

/// Switch this thread to a fresh virtual clock at [`TEST_START`].
///
/// Calling it again discards every queued fire and resets the time.
pub fn test_mode() -> Clock {
    let clock = Clock::test();
    TEST_CLOCK.with(|c| *c.borrow_mut() = Some(clock.clone()));
    clock
}

/// Return this thread to the real clock.
pub fn exit_test_mode() {
    TEST_CLOCK.with(|c| *c.borrow_mut() = None);
}

pub fn in_test_mode() -> bool {
    TEST_CLOCK.with(|c| c.borrow().is_some())
}

/// See [`Clock::advance_by`]. Panics outside test mode.
pub fn advance_by(d: Duration) -> SystemTime {
    clock().advance_by(d)
}

/// See [`Clock::advance_to`]. Panics outside test mode.
pub fn advance_to(t: SystemTime) -> SystemTime {
    clock().advance_to(t)
}

/// See [`Clock::next_tick`]. Panics outside test mode.
pub fn next_tick() -> SystemTime {
    clock().next_tick()
}
