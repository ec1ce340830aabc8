use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use upsmon_daemon::events::{EventLoop, LoopExit};
use upsmon_daemon::monitor::ShutdownMonitor;
use upsmon_daemon::port;
use upsmon_daemon::privileges::PrivilegeContext;
use upsmon_daemon::signals;
use upsmon_daemon::timer;

/// Monitoring daemon for FSP UPS units speaking the Megatec QS protocol.
#[derive(Parser)]
#[command(name = "upsmond", about = "UPS monitoring and shutdown daemon", version)]
struct Args {
    /// Turn on debug logging
    #[arg(short, long)]
    debug: bool,

    /// Query interval, seconds
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=60))]
    interval: u64,

    /// Serial port the UPS is attached to
    #[arg(short, long, default_value = "/dev/ttyS0")]
    port: PathBuf,

    /// Delay before shutdown, minutes
    #[arg(short = 's', long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=60))]
    shutdown_delay: u64,

    /// Drop privileges to the specified user
    #[arg(short, long)]
    user: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();

    info!("starting UPS monitor");

    let privileges = match &args.user {
        Some(user) => {
            let ctx = PrivilegeContext::capture(user)?;
            ctx.drop_to_unprivileged()?;
            ctx
        }
        None => PrivilegeContext::default(),
    };

    let sig_fd = signals::register_quit_signals()?;
    let port_fd = port::open(&args.port)?;
    let timer_fd = timer::create(Duration::from_secs(args.interval))?;

    let grace = Duration::from_secs(args.shutdown_delay * 60);
    let monitor = ShutdownMonitor::new(grace, privileges);

    let mut events = EventLoop::new(sig_fd, timer_fd, port_fd, monitor);
    match events.run() {
        LoopExit::Terminated(_) => debug!("event loop ended on termination signal"),
        LoopExit::ShutdownTriggered => debug!("event loop ended after shutdown trigger"),
    }

    events.release_privileges();
    info!("shutdown completed");

    Ok(())
}
