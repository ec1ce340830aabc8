//! The single-threaded poll loop driving the query/response cycle.
//!
//! Two poll slots: the signalfd, always watched for readability, and one
//! role slot that is reused across the cycle: the timer while idle, then
//! the serial port for the write and the read of one exchange. The
//! blocking `poll` with no timeout is the only suspension point.

use std::os::fd::{AsFd, OwnedFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::sys::signalfd::SignalFd;
use nix::sys::timerfd::TimerFd;
use nix::unistd;
use tracing::{debug, error, info};

use upsmon_protocol::protocol::{decode_response, UpsStatus, MAX_RESPONSE_LEN, REQUEST};

use crate::monitor::{MonotonicClock, ShutdownCommand, ShutdownMonitor, SystemClock, SystemShutdown, Verdict};
use crate::signals::{self, Disposition};

/// Which wait state the loop is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the next query tick.
    Idle,
    /// Waiting for the port to accept the request.
    Sending,
    /// Waiting for the UPS response.
    Receiving,
}

impl Phase {
    /// Poll interest of the role slot in this phase.
    fn interest(self) -> PollFlags {
        match self {
            Phase::Idle | Phase::Receiving => PollFlags::POLLIN,
            Phase::Sending => PollFlags::POLLOUT,
        }
    }

    fn next(self) -> Phase {
        match self {
            Phase::Idle => Phase::Sending,
            Phase::Sending => Phase::Receiving,
            Phase::Receiving => Phase::Idle,
        }
    }
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A recognized termination signal arrived.
    Terminated(Signal),
    /// The shutdown command has been launched.
    ShutdownTriggered,
}

/// Owns the three event sources and the monitor for the process lifetime.
pub struct EventLoop<C = SystemClock, S = SystemShutdown> {
    signals: SignalFd,
    timer: TimerFd,
    port: OwnedFd,
    phase: Phase,
    monitor: ShutdownMonitor<C, S>,
}

impl<C: MonotonicClock, S: ShutdownCommand> EventLoop<C, S> {
    pub fn new(
        signals: SignalFd,
        timer: TimerFd,
        port: OwnedFd,
        monitor: ShutdownMonitor<C, S>,
    ) -> Self {
        Self {
            signals,
            timer,
            port,
            phase: Phase::Idle,
            monitor,
        }
    }

    /// Run until a termination signal arrives or the shutdown command has
    /// been launched. Transient I/O and clock failures are logged and never
    /// end the loop.
    pub fn run(&mut self) -> LoopExit {
        info!("start processing events");

        loop {
            let (signal_ready, role_ready) = match self.wait() {
                Ok(ready) => ready,
                Err(err) => {
                    error!("poll failed: {err}");
                    continue;
                }
            };

            if signal_ready {
                match signals::read_quit_signal(&mut self.signals) {
                    Ok(Disposition::Quit(sig)) => {
                        info!("got signal {sig}, shutting down");
                        return LoopExit::Terminated(sig);
                    }
                    Ok(Disposition::Ignored(signo)) => {
                        error!("unknown signal #{signo}, ignored");
                    }
                    Err(err) => error!("{err}"),
                }
            }

            if role_ready {
                if let Some(exit) = self.advance() {
                    return exit;
                }
            }
        }
    }

    /// Block on the signalfd plus the role slot of the current phase.
    fn wait(&self) -> nix::Result<(bool, bool)> {
        let role_fd = match self.phase {
            Phase::Idle => self.timer.as_fd(),
            Phase::Sending | Phase::Receiving => self.port.as_fd(),
        };
        let interest = self.phase.interest();

        let mut fds = [
            PollFd::new(self.signals.as_fd(), PollFlags::POLLIN),
            PollFd::new(role_fd, interest),
        ];
        poll(&mut fds, PollTimeout::NONE)?;

        let signal_ready = fds[0]
            .revents()
            .unwrap_or(PollFlags::empty())
            .contains(PollFlags::POLLIN);
        // Error readiness counts as ready too, so a dead port is consumed
        // through the read/write path and logged instead of spinning here.
        let role_ready = fds[1]
            .revents()
            .unwrap_or(PollFlags::empty())
            .intersects(interest | PollFlags::POLLERR | PollFlags::POLLHUP);
        Ok((signal_ready, role_ready))
    }

    /// Handle readiness of the role slot and move the phase along its fixed
    /// cycle. A failed request write keeps the phase at Sending for a retry
    /// on the next wakeup.
    fn advance(&mut self) -> Option<LoopExit> {
        match self.phase {
            Phase::Idle => {
                // The tick payload is an expiration count; only draining it matters.
                let mut ticks = [0u8; 8];
                if let Err(err) = unistd::read(self.timer.as_fd(), &mut ticks) {
                    error!("failed to read timer expiration: {err}");
                }
                self.phase = self.phase.next();
            }
            Phase::Sending => match unistd::write(self.port.as_fd(), REQUEST) {
                Ok(n) if n == REQUEST.len() => {
                    debug!("request has been sent");
                    self.phase = self.phase.next();
                }
                Ok(n) => error!("short write of request ({n} of {} bytes)", REQUEST.len()),
                Err(err) => error!("unable to send request: {err}"),
            },
            Phase::Receiving => {
                let status = self.read_status();
                self.phase = self.phase.next();
                match self.monitor.observe(status) {
                    Ok(Verdict::ShuttingDown) => return Some(LoopExit::ShutdownTriggered),
                    Ok(Verdict::Continue) => {}
                    Err(err) => error!("status update failed: {err}"),
                }
            }
        }
        None
    }

    fn read_status(&mut self) -> UpsStatus {
        let mut buf = [0u8; MAX_RESPONSE_LEN - 1];
        match unistd::read(self.port.as_fd(), &mut buf) {
            Ok(0) => {
                error!("end of file on UPS port");
                UpsStatus::Invalid
            }
            Ok(n) => decode_response(&buf[..n]),
            Err(err) => {
                error!("unable to read response: {err}");
                UpsStatus::Invalid
            }
        }
    }

    /// Discard the identity snapshots once the loop is done.
    pub fn release_privileges(&mut self) {
        self.monitor.release_privileges();
    }
}

#[cfg(test)]
mod tests;
