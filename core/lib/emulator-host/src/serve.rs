use std::{sync::mpsc::{Receiver, RecvTimeoutError}, time::Instant};

use micro4_core_emulator_protocol::{CodecError, Event, EventFrame};
use thiserror::Error;
use tracing::{debug, info};

use crate::{Dispatcher, HostConfig};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("event channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Serves commands arriving on `commands` until that channel disconnects.
///
/// `HOST_READY` is emitted first. Each encoded event is passed to `emit`; if it fails, the
/// front-end is gone and serving stops with that error.
pub fn serve(
    commands: Receiver<String>,
    config: HostConfig,
    mut emit: impl FnMut(String) -> Result<(), HostError>,
) -> Result<(), HostError> {
    let mut dispatcher = Dispatcher::new(config);
    send(&mut emit, vec![EventFrame::stream(Event::HostReady)])?;
    info!(tick = ?config.tick, "host ready");

    // Deadline for the next run batch, only set while running
    let mut next_tick: Option<Instant> = None;

    loop {
        let received = match next_tick {
            Some(deadline) => match commands.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(text) => Some(text),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match commands.recv() {
                Ok(text) => Some(text),
                Err(_) => break,
            },
        };

        if let Some(text) = received {
            send(&mut emit, dispatcher.handle_text(&text))?;
        }

        let now = Instant::now();
        next_tick = match next_tick {
            _ if !dispatcher.is_running() => None,
            None => Some(now + dispatcher.tick_interval()),
            // Due batches run whether or not a command arrived first. Missed batches aren't
            // caught up on.
            Some(deadline) if deadline <= now => {
                send(&mut emit, dispatcher.tick())?;
                dispatcher.is_running().then(|| now + dispatcher.tick_interval())
            }
            Some(deadline) => Some(deadline),
        };
    }

    debug!("command channel disconnected, host exiting");
    Ok(())
}

fn send(
    emit: &mut impl FnMut(String) -> Result<(), HostError>,
    events: Vec<EventFrame>,
) -> Result<(), HostError> {
    for event in events {
        emit(event.to_json()?)?;
    }
    Ok(())
}
