use std::cell::Cell;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::rc::Rc;
use std::time::Duration;

use nix::sys::signal::{raise, SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use super::*;
use crate::errors::Result;
use crate::privileges::PrivilegeContext;
use crate::timer;

const OFFLINE: &[u8] = b"(012.3 229.7 220.2 014 50.1 24.6 --.- 10001001\r";

/// Advances by one second on every read, starting at zero.
#[derive(Clone, Default)]
struct TickingClock(Rc<Cell<u64>>);

impl MonotonicClock for TickingClock {
    fn now(&self) -> Result<Duration> {
        let t = self.0.get();
        self.0.set(t + 1);
        Ok(Duration::from_secs(t))
    }
}

#[derive(Clone, Default)]
struct RecordingShutdown {
    calls: Rc<Cell<usize>>,
}

impl ShutdownCommand for RecordingShutdown {
    fn run(&mut self) -> std::io::Result<ExitStatus> {
        self.calls.set(self.calls.get() + 1);
        Ok(ExitStatus::from_raw(0))
    }
}

fn empty_signalfd() -> SignalFd {
    SignalFd::with_flags(&SigSet::empty(), SfdFlags::SFD_CLOEXEC).unwrap()
}

#[test]
fn phase_cycle_is_fixed() {
    assert_eq!(Phase::Idle.next(), Phase::Sending);
    assert_eq!(Phase::Sending.next(), Phase::Receiving);
    assert_eq!(Phase::Receiving.next(), Phase::Idle);
}

#[test]
fn phase_interest_matches_the_bound_handle() {
    assert_eq!(Phase::Idle.interest(), PollFlags::POLLIN);
    assert_eq!(Phase::Sending.interest(), PollFlags::POLLOUT);
    assert_eq!(Phase::Receiving.interest(), PollFlags::POLLIN);
}

#[test]
fn offline_responses_drive_a_shutdown() {
    let (daemon_side, ups_side) = UnixStream::pair().unwrap();

    // Two full exchanges: the first starts the streak, the second fires.
    let responder = std::thread::spawn(move || {
        let mut ups = ups_side;
        let mut buf = [0u8; 3];
        for _ in 0..2 {
            ups.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"QS\r");
            ups.write_all(OFFLINE).unwrap();
        }
    });

    let shutdown = RecordingShutdown::default();
    let calls = shutdown.calls.clone();
    let monitor = ShutdownMonitor::with_parts(
        Duration::from_secs(1),
        TickingClock::default(),
        shutdown,
        PrivilegeContext::default(),
    );

    let timer = timer::create(Duration::from_millis(20)).unwrap();
    let mut events = EventLoop::new(
        empty_signalfd(),
        timer,
        OwnedFd::from(daemon_side),
        monitor,
    );

    assert_eq!(events.run(), LoopExit::ShutdownTriggered);
    assert_eq!(calls.get(), 1);
    responder.join().unwrap();
}

#[test]
fn error_only_readiness_is_consumed_as_a_transport_error() {
    let (read_end, write_end) = nix::unistd::pipe().unwrap();

    let monitor = ShutdownMonitor::with_parts(
        Duration::from_secs(1),
        TickingClock::default(),
        RecordingShutdown::default(),
        PrivilegeContext::default(),
    );
    let timer = timer::create(Duration::from_secs(30)).unwrap();
    let mut events = EventLoop::new(empty_signalfd(), timer, read_end, monitor);
    events.phase = Phase::Receiving;

    // An empty pipe with no writer left reports POLLHUP without POLLIN.
    drop(write_end);

    let (signal_ready, role_ready) = events.wait().unwrap();
    assert!(!signal_ready);
    assert!(role_ready);

    // The dead port reads as end of file and the cycle moves on.
    assert_eq!(events.advance(), None);
    assert_eq!(events.phase, Phase::Idle);
}

#[test]
fn termination_signal_ends_the_loop() {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.thread_block().unwrap();
    let sig_fd = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC).unwrap();

    raise(Signal::SIGTERM).unwrap();

    let (daemon_side, _ups_side) = UnixStream::pair().unwrap();
    let monitor = ShutdownMonitor::with_parts(
        Duration::from_secs(1),
        TickingClock::default(),
        RecordingShutdown::default(),
        PrivilegeContext::default(),
    );
    // Long interval so no tick gets in before the signal.
    let timer = timer::create(Duration::from_secs(30)).unwrap();
    let mut events = EventLoop::new(sig_fd, timer, OwnedFd::from(daemon_side), monitor);

    assert_eq!(events.run(), LoopExit::Terminated(Signal::SIGTERM));
}
