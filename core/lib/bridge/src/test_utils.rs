use std::{io, sync::{atomic::{AtomicUsize, Ordering}, Arc}};

use micro4_core_emulator_host::{Dispatcher, HostConfig};
use micro4_core_emulator_protocol::{CommandFrame, Event, EventFrame, StateSnapshot, MEMORY_SIZE};
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::{HostLauncher, HostLink, HostMessage, HostTransport, TransportError};

/// What a scripted host does when launched.
#[derive(Debug, Clone)]
pub enum Greeting {
    Ready,
    Error(String),
    Silent,
    LaunchFails,
}

/// A host for tests, driven by hand.
///
/// Commands are answered immediately by a real [Dispatcher], unless the host is
/// unresponsive. Run batches only happen when the test calls [ScriptedHost::tick].
#[derive(Clone)]
pub struct ScriptedHost {
    script: Arc<Script>,
}

struct Script {
    greeting: Greeting,
    dispatcher: Option<Mutex<Dispatcher>>,
    posted: Mutex<Vec<CommandFrame>>,
    events: Mutex<Option<UnboundedSender<HostMessage>>>,
    launches: AtomicUsize,
}

impl ScriptedHost {
    pub fn emulating() -> Self {
        Self::build(Greeting::Ready, true)
    }

    /// Becomes ready, but never answers anything.
    pub fn unresponsive() -> Self {
        Self::build(Greeting::Ready, false)
    }

    pub fn greeting(greeting: Greeting) -> Self {
        Self::build(greeting, true)
    }

    fn build(greeting: Greeting, responds: bool) -> Self {
        Self {
            script: Arc::new(Script {
                greeting,
                dispatcher: responds.then(|| Mutex::new(Dispatcher::new(HostConfig::default()))),
                posted: Mutex::new(vec![]),
                events: Mutex::new(None),
                launches: AtomicUsize::new(0),
            }),
        }
    }

    pub fn launches(&self) -> usize {
        self.script.launches.load(Ordering::SeqCst)
    }

    pub fn posted(&self) -> Vec<CommandFrame> {
        self.script.posted.lock().clone()
    }

    pub fn posted_names(&self) -> Vec<&'static str> {
        self.script.posted.lock().iter().map(|f| f.command.name()).collect()
    }

    /// Sends an event as though the host produced it.
    pub fn push(&self, frame: EventFrame) {
        self.script.send(vec![frame]);
    }

    /// Runs one batch of the active run.
    pub fn tick(&self) {
        if let Some(dispatcher) = &self.script.dispatcher {
            let events = dispatcher.lock().tick();
            self.script.send(events);
        }
    }

    /// Severs the event channel, as if the host died.
    pub fn crash(&self) {
        self.script.events.lock().take();
    }
}

impl Script {
    fn send(&self, frames: Vec<EventFrame>) {
        if let Some(events) = &*self.events.lock() {
            for frame in frames {
                let _ = events.send(HostMessage::Frame(frame.to_json().unwrap()));
            }
        }
    }
}

impl HostLauncher for ScriptedHost {
    fn launch(&self) -> io::Result<HostLink> {
        self.script.launches.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded_channel();

        match &self.script.greeting {
            Greeting::LaunchFails => return Err(io::Error::new(io::ErrorKind::NotFound, "no such host")),
            Greeting::Ready => { let _ = tx.send(HostMessage::Frame(EventFrame::stream(Event::HostReady).to_json().unwrap())); }
            Greeting::Error(message) => {
                let event = Event::Error { message: message.clone(), address: None };
                let _ = tx.send(HostMessage::Frame(EventFrame::stream(event).to_json().unwrap()));
            }
            Greeting::Silent => (),
        }

        *self.script.events.lock() = Some(tx);
        Ok(HostLink { transport: Box::new(ScriptedTransport { script: self.script.clone() }), events: rx })
    }
}

struct ScriptedTransport {
    script: Arc<Script>,
}

impl HostTransport for ScriptedTransport {
    fn post(&self, frame: String) -> Result<(), TransportError> {
        if self.script.events.lock().is_none() {
            return Err(TransportError("scripted host is gone".to_owned()))
        }

        let frame = CommandFrame::from_json(&frame).unwrap();
        self.script.posted.lock().push(frame.clone());
        if let Some(dispatcher) = &self.script.dispatcher {
            let replies = dispatcher.lock().handle(frame);
            self.script.send(replies);
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.script.events.lock().take();
    }
}

pub fn blank_snapshot() -> StateSnapshot {
    StateSnapshot {
        pc: 0,
        accumulator: 0,
        zero: false,
        ir: 0,
        mar: 0,
        mdr: 0,
        halted: false,
        error: None,
        cycles: 0,
        instructions: 0,
        memory: vec![0; MEMORY_SIZE],
    }
}

/// Lets spawned tasks, like the listener, catch up.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
