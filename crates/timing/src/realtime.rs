//! Wall-clock waits that notice suspend/resume and clock jumps.
//!
//! On Linux this arms a `CLOCK_REALTIME` timerfd with an absolute deadline
//! and `TFD_TIMER_CANCEL_ON_SET`, so the kernel wakes us both when the
//! deadline passes (even across suspend) and when the clock is set
//! discontinuously. Elsewhere it falls back to a monotonic sleep.

use crate::scheduler::Wake;
use std::time::SystemTime;

#[cfg(target_os = "linux")]
pub(crate) async fn wait_until(deadline: SystemTime) -> Wake {
    match linux::wait_until(deadline).await {
        Ok(wake) => wake,
        Err(e) => {
            tracing::warn!("timerfd unavailable ({e}); falling back to sleep");
            sleep_until(deadline).await
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) async fn wait_until(deadline: SystemTime) -> Wake {
    sleep_until(deadline).await
}

#[allow(dead_code)]
async fn sleep_until(deadline: SystemTime) -> Wake {
    let d = deadline.duration_since(SystemTime::now()).unwrap_or_default();
    tokio::time::sleep(d).await;
    Wake::Deadline
}

#[cfg(target_os = "linux")]
mod linux {
    use super::Wake;
    use nix::errno::Errno;
    use nix::sys::time::TimeSpec;
    use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
    use std::io;
    use std::os::fd::{AsFd, AsRawFd, RawFd};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::io::unix::AsyncFd;

    struct Fd(TimerFd);

    impl AsRawFd for Fd {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_fd().as_raw_fd()
        }
    }

    pub(super) async fn wait_until(deadline: SystemTime) -> io::Result<Wake> {
        let tfd = TimerFd::new(
            ClockId::CLOCK_REALTIME,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )?;
        let abs = deadline.duration_since(UNIX_EPOCH).unwrap_or_default();
        tfd.set(
            Expiration::OneShot(TimeSpec::from_duration(abs)),
            TimerSetTimeFlags::TFD_TIMER_ABSTIME | TimerSetTimeFlags::TFD_TIMER_CANCEL_ON_SET,
        )?;

        let fd = AsyncFd::new(Fd(tfd))?;
        loop {
            let mut guard = fd.readable().await?;
            match guard.get_inner().0.wait() {
                Ok(()) => return Ok(Wake::Deadline),
                Err(Errno::ECANCELED) => return Ok(Wake::ClockChanged),
                Err(Errno::EAGAIN) => guard.clear_ready(),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
