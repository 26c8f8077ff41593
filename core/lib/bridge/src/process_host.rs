use std::{io, path::PathBuf, process::Stdio};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};
use tracing::{debug, info, warn};

use crate::{HostLauncher, HostLink, HostMessage, HostTransport, TransportError};

/// Runs the host as a child process, exchanging one frame per line over its stdin and stdout.
///
/// Must be launched from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: vec![] }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl HostLauncher for ProcessLauncher {
    fn launch(&self) -> io::Result<HostLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        info!(program = %self.program.display(), pid = ?child.id(), "launched host process");

        let stdin = child.stdin.take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "host stdin unavailable"))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "host stdout unavailable"))?;

        let (command_tx, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        tokio::spawn(write_commands(stdin, command_rx));
        tokio::spawn(read_events(stdout, event_tx));

        Ok(HostLink {
            transport: Box::new(ProcessTransport {
                commands: Mutex::new(Some(command_tx)),
                child: Mutex::new(child),
            }),
            events: event_rx,
        })
    }
}

async fn write_commands(mut stdin: ChildStdin, mut commands: UnboundedReceiver<String>) {
    while let Some(mut frame) = commands.recv().await {
        frame.push('\n');
        let written = match stdin.write_all(frame.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // The reader sees the process go away and reports it
            warn!(error = %e, "failed to write to host process");
            return
        }
    }
    debug!("host process writer finished");
}

async fn read_events(stdout: ChildStdout, events: UnboundedSender<HostMessage>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                if events.send(HostMessage::Frame(line)).is_err() {
                    return
                }
            }
            Ok(None) => {
                debug!("host process closed its output");
                return
            }
            Err(e) => {
                let _ = events.send(HostMessage::Fault(e.to_string()));
                return
            }
        }
    }
}

struct ProcessTransport {
    commands: Mutex<Option<UnboundedSender<String>>>,
    child: Mutex<Child>,
}

impl HostTransport for ProcessTransport {
    fn post(&self, frame: String) -> Result<(), TransportError> {
        match &*self.commands.lock() {
            Some(commands) => commands.send(frame)
                .map_err(|_| TransportError("host process writer has exited".to_owned())),
            None => Err(TransportError("host has been shut down".to_owned())),
        }
    }

    fn shutdown(&self) {
        self.commands.lock().take();
        if let Err(e) = self.child.lock().start_kill() {
            debug!(error = %e, "host process already gone");
        }
    }
}
