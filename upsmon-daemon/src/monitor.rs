//! Offline debounce and the shutdown trigger.
//!
//! Turns the stream of decoded UPS observations into at most one shutdown:
//! the UPS has to stay offline for the whole grace period before the
//! external `shutdown` command is run under the elevated identity.

use std::process::{Command, ExitStatus};
use std::time::Duration;

use nix::time::{clock_gettime, ClockId};
use tracing::{debug, error, info};

use upsmon_protocol::protocol::UpsStatus;

use crate::errors::{DaemonError, Result};
use crate::privileges::PrivilegeContext;

/// Outcome of feeding one observation into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep polling.
    Continue,
    /// The shutdown command ran successfully; monitoring is moot.
    ShuttingDown,
}

/// Source of monotonic time, injectable for tests.
pub trait MonotonicClock {
    fn now(&self) -> Result<Duration>;
}

/// Reads `CLOCK_MONOTONIC`, immune to wall-clock adjustments.
#[derive(Debug, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now(&self) -> Result<Duration> {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(DaemonError::Clock)?;
        Ok(Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32))
    }
}

/// Runs the external shutdown command, reporting its exit status.
pub trait ShutdownCommand {
    fn run(&mut self) -> std::io::Result<ExitStatus>;
}

/// Invokes `shutdown` with no arguments and waits for it.
#[derive(Debug, Default)]
pub struct SystemShutdown;

impl ShutdownCommand for SystemShutdown {
    fn run(&mut self) -> std::io::Result<ExitStatus> {
        Command::new("shutdown").status()
    }
}

/// Debounces offline observations against the grace period.
pub struct ShutdownMonitor<C = SystemClock, S = SystemShutdown> {
    grace: Duration,
    offline_since: Option<Duration>,
    clock: C,
    shutdown: S,
    privileges: PrivilegeContext,
}

impl ShutdownMonitor {
    pub fn new(grace: Duration, privileges: PrivilegeContext) -> Self {
        Self::with_parts(grace, SystemClock, SystemShutdown, privileges)
    }
}

impl<C: MonotonicClock, S: ShutdownCommand> ShutdownMonitor<C, S> {
    pub fn with_parts(grace: Duration, clock: C, shutdown: S, privileges: PrivilegeContext) -> Self {
        Self {
            grace,
            offline_since: None,
            clock,
            shutdown,
            privileges,
        }
    }

    /// Feed one decoded observation into the debounce logic.
    ///
    /// An invalid observation is an error that leaves the offline streak
    /// untouched: a single malformed read neither interrupts nor starts a
    /// streak.
    pub fn observe(&mut self, status: UpsStatus) -> Result<Verdict> {
        match status {
            UpsStatus::Online => {
                if self.offline_since.take().is_some() {
                    info!("UPS became online, system shutdown canceled");
                } else {
                    debug!("UPS is online");
                }
                Ok(Verdict::Continue)
            }
            UpsStatus::Invalid => Err(DaemonError::InvalidResponse),
            UpsStatus::Offline => self.observe_offline(),
        }
    }

    fn observe_offline(&mut self) -> Result<Verdict> {
        let now = self.clock.now()?;

        let Some(since) = self.offline_since else {
            self.offline_since = Some(now);
            info!(
                "UPS became offline, {} sec left before system shutdown",
                self.grace.as_secs()
            );
            return Ok(Verdict::Continue);
        };

        let elapsed = now.saturating_sub(since);
        if elapsed < self.grace {
            info!(
                "UPS is offline, {} sec left before system shutdown",
                (self.grace - elapsed).as_secs()
            );
            return Ok(Verdict::Continue);
        }

        self.offline_since = None;
        info!("shutdown delay is over, going to shutdown system");
        self.trigger_shutdown()
    }

    // The offline timer is already cleared here; a failed elevation means
    // the command is not run and the debounce restarts from the next
    // offline observation.
    fn trigger_shutdown(&mut self) -> Result<Verdict> {
        self.privileges.elevate_to_privileged()?;

        let outcome = self.shutdown.run();

        if let Err(err) = self.privileges.drop_to_unprivileged() {
            error!("failed to drop privileges after shutdown attempt: {err}");
        }

        match outcome {
            Ok(status) if status.success() => {
                info!("shutdown in progress, 1 minute left");
                Ok(Verdict::ShuttingDown)
            }
            Ok(status) => Err(DaemonError::ShutdownExit(status)),
            Err(err) => Err(DaemonError::ShutdownSpawn(err)),
        }
    }

    /// Discard the identity snapshots once monitoring is over.
    pub fn release_privileges(&mut self) {
        self.privileges.release();
    }
}
