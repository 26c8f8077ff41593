//! Serves an emulator host over stdio, for front-ends which run it as a child process.
//!
//! Commands arrive on stdin and events leave on stdout, one JSON frame per line.
//! Logs are written to stderr, filtered by `RUST_LOG`.

use std::{io::{stdin, stdout, BufRead, Write}, process::exit, sync::mpsc, thread, time::Duration};

use clap::Parser;
use micro4_core_emulator_host::{serve, HostConfig, HostError};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Interval between batches while running, in milliseconds
    #[arg(long, env = "MICRO4_TICK_MS", default_value_t = 16)]
    tick_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = HostConfig { tick: Duration::from_millis(args.tick_ms.max(1)) };

    // The host waits on a channel, so stdin is pumped into one from its own thread
    let (command_tx, command_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => if command_tx.send(line).is_err() { break },
                Err(e) => {
                    warn!(error = %e, "failed reading stdin");
                    break
                }
            }
        }
        debug!("stdin closed");
    });

    let mut out = stdout().lock();
    let result = serve(command_rx, config, |frame| {
        writeln!(out, "{frame}")
            .and_then(|_| out.flush())
            .map_err(|_| HostError::ChannelClosed)
    });

    match result {
        Ok(()) | Err(HostError::ChannelClosed) => (),
        Err(e) => {
            error!(error = %e, "host failed");
            exit(1)
        }
    }
}
