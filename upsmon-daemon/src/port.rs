//! Serial line setup for the UPS link.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices,
};
use tracing::info;

use crate::errors::{DaemonError, Result};

/// Port speed fixed by the Megatec protocol specification.
const PORT_SPEED: BaudRate = BaudRate::B2400;

/// Open `path` and configure it for the UPS: raw 8N1 at 2400 baud, no flow
/// control, RTS raised.
pub fn open(path: &Path) -> Result<OwnedFd> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC | libc::O_NOCTTY)
        .open(path)
        .map_err(|e| port_err(path, "open", e))?;
    let fd: OwnedFd = file.into();

    termios::tcflush(fd.as_fd(), FlushArg::TCIOFLUSH)
        .map_err(|e| port_err(path, "flush", e.into()))?;

    let mut opts =
        termios::tcgetattr(fd.as_fd()).map_err(|e| port_err(path, "read settings", e.into()))?;

    termios::cfsetispeed(&mut opts, PORT_SPEED)
        .map_err(|e| port_err(path, "set input speed", e.into()))?;
    termios::cfsetospeed(&mut opts, PORT_SPEED)
        .map_err(|e| port_err(path, "set output speed", e.into()))?;

    opts.control_flags.remove(ControlFlags::CSIZE);
    opts.control_flags
        .insert(ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD);
    opts.control_flags.remove(
        ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CRTSCTS | ControlFlags::CSTOPB,
    );
    opts.input_flags = InputFlags::IGNBRK;
    opts.local_flags = LocalFlags::empty();
    opts.output_flags = OutputFlags::empty();
    opts.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;
    opts.control_chars[SpecialCharacterIndices::VMIN as usize] = 60;

    termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &opts)
        .map_err(|e| port_err(path, "apply settings", e.into()))?;

    raise_rts(&fd).map_err(|e| port_err(path, "raise RTS", e))?;

    // Touching the modem lines can re-enable hardware flow control on some
    // drivers; clear it once more.
    let mut opts =
        termios::tcgetattr(fd.as_fd()).map_err(|e| port_err(path, "reread settings", e.into()))?;
    opts.control_flags.remove(ControlFlags::CRTSCTS);
    termios::tcsetattr(fd.as_fd(), SetArg::TCSANOW, &opts)
        .map_err(|e| port_err(path, "reapply settings", e.into()))?;

    info!("port {} successfully opened and configured", path.display());

    Ok(fd)
}

fn raise_rts(fd: &OwnedFd) -> std::result::Result<(), io::Error> {
    let raw = fd.as_raw_fd();
    let mut bits: libc::c_int = 0;

    // SAFETY: raw is a valid open descriptor and bits points to a c_int the
    // ioctl fills in.
    if unsafe { libc::ioctl(raw, libc::TIOCMGET, &mut bits) } < 0 {
        return Err(io::Error::last_os_error());
    }

    bits |= libc::TIOCM_RTS;

    // SAFETY: same descriptor; bits points to the modem flag word to apply.
    if unsafe { libc::ioctl(raw, libc::TIOCMSET, &bits) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

fn port_err(path: &Path, step: &'static str, source: io::Error) -> DaemonError {
    DaemonError::Port {
        path: path.to_path_buf(),
        step,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reports_the_failing_step() {
        let err = open(Path::new("/nonexistent/ttyS99")).unwrap_err();
        assert!(matches!(err, DaemonError::Port { step: "open", .. }));
    }
}
