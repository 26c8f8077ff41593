use std::{io, sync::mpsc, thread};

use micro4_core_emulator_host::{serve, HostConfig, HostError};
use parking_lot::Mutex;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};

use crate::{HostLauncher, HostLink, HostMessage, HostTransport, TransportError};

/// Runs the host on a dedicated thread in this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLauncher {
    pub config: HostConfig,
}

impl ThreadLauncher {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl HostLauncher for ThreadLauncher {
    fn launch(&self) -> io::Result<HostLink> {
        let (command_tx, command_rx) = mpsc::channel::<String>();
        let (event_tx, event_rx) = unbounded_channel();

        let config = self.config;
        thread::Builder::new()
            .name("micro4-host".to_owned())
            .spawn(move || {
                let result = serve(command_rx, config, |text| {
                    event_tx.send(HostMessage::Frame(text)).map_err(|_| HostError::ChannelClosed)
                });
                match result {
                    Ok(()) | Err(HostError::ChannelClosed) => debug!("host thread finished"),
                    Err(e) => {
                        warn!(error = %e, "host thread failed");
                        let _ = event_tx.send(HostMessage::Fault(e.to_string()));
                    }
                }
            })?;

        Ok(HostLink {
            transport: Box::new(ThreadTransport { commands: Mutex::new(Some(command_tx)) }),
            events: event_rx,
        })
    }
}

struct ThreadTransport {
    commands: Mutex<Option<mpsc::Sender<String>>>,
}

impl HostTransport for ThreadTransport {
    fn post(&self, frame: String) -> Result<(), TransportError> {
        match &*self.commands.lock() {
            Some(commands) => commands.send(frame)
                .map_err(|_| TransportError("host thread has exited".to_owned())),
            None => Err(TransportError("host has been shut down".to_owned())),
        }
    }

    fn shutdown(&self) {
        // The host thread exits once its command channel disconnects
        self.commands.lock().take();
    }
}
