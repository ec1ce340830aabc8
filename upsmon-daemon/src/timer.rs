//! Periodic query timer backed by a timerfd.

use std::time::Duration;

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use crate::errors::{DaemonError, Result};

/// Create a monotonic interval timer firing every `interval`, first
/// expiration included.
pub fn create(interval: Duration) -> Result<TimerFd> {
    let timer =
        TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::TFD_CLOEXEC).map_err(DaemonError::Timer)?;
    timer
        .set(
            Expiration::Interval(TimeSpec::from(interval)),
            TimerSetTimeFlags::empty(),
        )
        .map_err(DaemonError::Timer)?;
    Ok(timer)
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsFd;

    use nix::poll::{poll, PollFd, PollFlags};

    use super::*;

    #[test]
    fn fires_periodically() {
        let timer = create(Duration::from_millis(20)).unwrap();

        let mut fds = [PollFd::new(timer.as_fd(), PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, 1000u16).unwrap(), 1);

        let mut ticks = [0u8; 8];
        nix::unistd::read(timer.as_fd(), &mut ticks).unwrap();
        assert!(u64::from_ne_bytes(ticks) >= 1);
    }
}
