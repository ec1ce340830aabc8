//! UPS monitoring daemon.
//!
//! Polls an FSP UPS over a serial line and triggers an orderly system
//! shutdown once the UPS has been on battery for longer than the configured
//! grace period. Normally runs under an unprivileged identity and elevates
//! only for the instant it invokes the shutdown command.

pub mod errors;
pub mod events;
pub mod monitor;
pub mod port;
pub mod privileges;
pub mod signals;
pub mod timer;
