use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("privilege setup requires root (real gid is {0})")]
    NotRoot(u32),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid group count {count} for user '{user}'")]
    GroupCount { user: String, count: i32 },

    #[error("failed to {step}: {source}")]
    Identity {
        step: &'static str,
        #[source]
        source: Errno,
    },

    #[error("port {}: failed to {step}: {source}", path.display())]
    Port {
        path: PathBuf,
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to set up quit signals: {0}")]
    Signals(#[source] Errno),

    #[error("failed to read signal info: {0}")]
    SignalRead(#[source] Errno),

    #[error("failed to create interval timer: {0}")]
    Timer(#[source] Errno),

    #[error("failed to read monotonic clock: {0}")]
    Clock(#[source] Errno),

    #[error("invalid response from UPS")]
    InvalidResponse,

    #[error("failed to run shutdown command: {0}")]
    ShutdownSpawn(#[source] io::Error),

    #[error("shutdown command failed with {0}")]
    ShutdownExit(ExitStatus),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
