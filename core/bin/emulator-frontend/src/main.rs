//! Interactive console for the Micro4 emulator.
//!
//! Reads one command per line and drives an emulator host through a [Bridge]. By default the
//! host runs on a thread in this process; `--backend` runs the given binary instead.

use std::{io::Write, path::PathBuf, process::exit, time::Duration};

use clap::Parser;
use micro4_core_bridge::{Bridge, BridgeConfig, ProcessLauncher, ThreadLauncher};
use micro4_core_emulator_host::HostConfig;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::state::{ApplicationState, Flow};

mod display;
mod state;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a `micro4-backend` binary to run the host in, instead of in-process
    #[arg(long)]
    backend: Option<PathBuf>,

    /// How long to wait for the host to start, in milliseconds
    #[arg(long, env = "MICRO4_INIT_TIMEOUT_MS", default_value_t = 30_000)]
    init_timeout_ms: u64,

    /// How long any command waits for its reply, in milliseconds
    #[arg(long, env = "MICRO4_COMMAND_TIMEOUT_MS", default_value_t = 10_000)]
    command_timeout_ms: u64,

    /// Interval between batches while running, in milliseconds
    #[arg(long, env = "MICRO4_TICK_MS", default_value_t = 16)]
    tick_ms: u64,

    /// Assembly file to load on start-up
    program: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = BridgeConfig::default()
        .with_init_timeout(Duration::from_millis(args.init_timeout_ms))
        .with_command_timeout(Duration::from_millis(args.command_timeout_ms));

    let bridge = match &args.backend {
        Some(path) => Bridge::new(
            ProcessLauncher::new(path).arg("--tick-ms").arg(args.tick_ms.to_string()),
            config,
        ),
        None => Bridge::new(
            ThreadLauncher::new(HostConfig { tick: Duration::from_millis(args.tick_ms.max(1)) }),
            config,
        ),
    };
    if let Err(e) = bridge.init().await {
        eprintln!("{e}");
        exit(1)
    }

    let mut app = ApplicationState::new(bridge);
    if let Some(program) = &args.program {
        if let Err(e) = app.execute_command(&format!("load {}", shell_words::quote(&program.to_string_lossy()))).await {
            eprintln!("{e}");
        }
    }

    println!("micro4 emulator, type `help` for commands");
    let mut lines = BufReader::new(stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("{e}");
                break
            }
        };

        match app.execute_command(&line).await {
            Ok(Flow::Continue) => (),
            Ok(Flow::Quit) => break,
            Err(e) => println!("error: {e}"),
        }
    }

    app.shutdown();
}
