//! Termination signal routing through a signalfd.

use nix::errno::Errno;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use tracing::debug;

use crate::errors::{DaemonError, Result};

const QUIT_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

/// Block every signal for the process and return a signalfd carrying the
/// quit signals.
pub fn register_quit_signals() -> Result<SignalFd> {
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), None).map_err(DaemonError::Signals)?;

    let mut mask = SigSet::empty();
    for sig in QUIT_SIGNALS {
        mask.add(sig);
        debug!("signal {sig} registered");
    }

    SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC).map_err(DaemonError::Signals)
}

/// What one signal read amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A recognized termination signal; the daemon should exit.
    Quit(Signal),
    /// Anything else; logged by the caller and ignored.
    Ignored(i32),
}

/// Read one pending signal from the signalfd and classify it.
pub fn read_quit_signal(fd: &mut SignalFd) -> Result<Disposition> {
    let info = fd
        .read_signal()
        .map_err(DaemonError::SignalRead)?
        .ok_or(DaemonError::SignalRead(Errno::EAGAIN))?;
    Ok(classify(info.ssi_signo as i32))
}

fn classify(signo: i32) -> Disposition {
    match Signal::try_from(signo) {
        Ok(sig) if QUIT_SIGNALS.contains(&sig) => Disposition::Quit(sig),
        _ => Disposition::Ignored(signo),
    }
}
