use std::{collections::{BTreeSet, HashMap}, sync::{atomic::{AtomicBool, Ordering}, Arc}};

use micro4_core_emulator_protocol::{CommandId, Event, EventFrame, StateSnapshot};
use parking_lot::Mutex;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tracing::{debug, trace, warn};

use crate::{subscribers::Subscribers, BridgeError, Fault, HostMessage};

pub(crate) type Reply = Result<Event, BridgeError>;

/// Most abandoned ids remembered at once. Beyond this, the oldest are forgotten and their
/// replies, if they ever come, are treated as unsolicited.
const MAX_ABANDONED: usize = 1024;

#[derive(Default)]
struct Correlation {
    /// Commands waiting on a reply.
    pending: HashMap<CommandId, oneshot::Sender<Reply>>,

    /// Commands whose caller gave up. Their replies are dropped when they arrive.
    abandoned: BTreeSet<CommandId>,
}

/// State shared between the bridge and the task listening to its host.
pub(crate) struct Relay {
    pub running: AtomicBool,
    pub subscribers: Subscribers,
    latest: Mutex<Option<StateSnapshot>>,
    correlation: Mutex<Correlation>,

    /// Why the transport failed, once it has.
    fault: Mutex<Option<String>>,

    /// Set on termination. Nothing is delivered after that.
    detached: AtomicBool,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            subscribers: Subscribers::new(),
            latest: Mutex::new(None),
            correlation: Mutex::new(Correlation::default()),
            fault: Mutex::new(None),
            detached: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn latest(&self) -> Option<StateSnapshot> {
        self.latest.lock().clone()
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Starts waiting for the reply to `id`.
    pub fn expect(&self, id: CommandId) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.correlation.lock().pending.insert(id, tx);
        rx
    }

    /// Stops waiting for `id`, because it was never sent.
    pub fn forget(&self, id: CommandId) {
        self.correlation.lock().pending.remove(&id);
    }

    /// Stops waiting for `id` while its reply may still be on the way.
    pub fn abandon(&self, id: CommandId) {
        let mut correlation = self.correlation.lock();
        if correlation.pending.remove(&id).is_some() {
            correlation.abandoned.insert(id);
            if correlation.abandoned.len() > MAX_ABANDONED {
                correlation.abandoned.pop_first();
            }
        }
    }

    /// Rejects every command still waiting. Returns how many there were.
    pub fn fail_pending(&self, error: BridgeError) -> usize {
        let pending = std::mem::take(&mut self.correlation.lock().pending);
        let count = pending.len();
        for (_, waiter) in pending {
            let _ = waiter.send(Err(error.clone()));
        }
        count
    }

    /// Stops all further delivery.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        self.set_running(false);
        self.fail_pending(BridgeError::Terminated);
        self.correlation.lock().abandoned.clear();
        self.subscribers.close();
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Routes one encoded event frame from the host.
    pub fn dispatch(&self, text: &str) {
        let frame = match EventFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "undecodable event from host");
                self.subscribers.error.notify(&Fault::Protocol(e.to_string()));
                return
            }
        };
        let EventFrame { reply_to, event } = frame;
        trace!(reply_to = ?reply_to, event = event.name(), "event from host");

        let waiter = match reply_to {
            Some(id) => {
                let mut correlation = self.correlation.lock();
                if correlation.abandoned.remove(&id) {
                    debug!(id = %id, event = event.name(), "dropping late reply");
                    return
                }
                correlation.pending.remove(&id)
            }
            None => None,
        };

        if let Event::StateSnapshot { state } = &event {
            if let Err(e) = state.validate() {
                warn!(error = %e, "host sent a malformed snapshot");
                self.subscribers.error.notify(&Fault::Protocol(e.to_string()));
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(BridgeError::Protocol(e.to_string())));
                }
                return
            }
        }

        self.fan_out(&event);
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(event));
        }
    }

    /// Updates shared state from an event and tells the matching subscribers.
    fn fan_out(&self, event: &Event) {
        match event {
            Event::StateSnapshot { state } => {
                *self.latest.lock() = Some(state.clone());
                self.subscribers.state.notify(state);
            }
            Event::Halted => {
                self.set_running(false);
                self.subscribers.halted.notify(&());
            }
            Event::Error { message, address } => {
                self.set_running(false);
                self.subscribers.error.notify(&Fault::Host { message: message.clone(), address: *address });
            }
            Event::HostReady => debug!("ignoring repeated HOST_READY"),
        }
    }

    /// Records that the host can no longer be reached.
    /// Waiting commands are rejected; if none were waiting, error subscribers are told instead.
    fn transport_failed(&self, reason: String) {
        warn!(reason, "host transport failed");
        *self.fault.lock() = Some(reason.clone());
        self.set_running(false);

        // No more replies can arrive
        self.correlation.lock().abandoned.clear();

        if self.fail_pending(BridgeError::Transport(reason.clone())) == 0 {
            self.subscribers.error.notify(&Fault::Transport(reason));
        }
    }
}

/// Delivers everything the host sends until the channel closes or the bridge is terminated.
pub(crate) async fn listen(relay: Arc<Relay>, mut events: UnboundedReceiver<HostMessage>) {
    while let Some(message) = events.recv().await {
        if relay.is_detached() {
            return
        }

        match message {
            HostMessage::Frame(text) => relay.dispatch(&text),
            HostMessage::Fault(reason) => {
                relay.transport_failed(reason);
                return
            }
        }
    }

    if !relay.is_detached() {
        relay.transport_failed("host channel closed".to_owned());
    }
}

/// Cleans up after a command whose caller stops waiting before the reply arrives.
pub(crate) struct PendingReply<'a> {
    relay: &'a Relay,
    id: CommandId,
    settled: bool,
}

impl<'a> PendingReply<'a> {
    pub fn new(relay: &'a Relay, id: CommandId) -> (Self, oneshot::Receiver<Reply>) {
        let receiver = relay.expect(id);
        (Self { relay, id, settled: false }, receiver)
    }

    /// The command couldn't be sent, so no reply will come.
    pub fn unsent(mut self) {
        self.relay.forget(self.id);
        self.settled = true;
    }

    pub fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.relay.abandon(self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{atomic::{AtomicUsize, Ordering}, Arc};

    use micro4_core_emulator_protocol::{CommandId, Event, EventFrame};

    use crate::{relay::{Relay, MAX_ABANDONED}, test_utils::blank_snapshot, BridgeError, Fault};

    fn encode(frame: EventFrame) -> String {
        frame.to_json().unwrap()
    }

    #[test]
    fn test_reply_reaches_waiter_and_subscribers() {
        let relay = Relay::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            relay.subscribers.on_state_update(move |_| { seen.fetch_add(1, Ordering::SeqCst); });
        }

        let mut reply = relay.expect(CommandId(1));
        let state = blank_snapshot();
        relay.dispatch(&encode(EventFrame::reply(CommandId(1), Event::StateSnapshot { state: state.clone() })));

        assert_eq!(Ok(Ok(Event::StateSnapshot { state: state.clone() })), reply.try_recv());
        assert_eq!(1, seen.load(Ordering::SeqCst));
        assert_eq!(Some(state), relay.latest());
    }

    #[test]
    fn test_abandoned_reply_dropped() {
        let relay = Relay::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            relay.subscribers.on_state_update(move |_| { seen.fetch_add(1, Ordering::SeqCst); });
        }

        let _reply = relay.expect(CommandId(4));
        relay.abandon(CommandId(4));
        relay.dispatch(&encode(EventFrame::reply(CommandId(4), Event::StateSnapshot { state: blank_snapshot() })));
        assert_eq!(0, seen.load(Ordering::SeqCst));
        assert_eq!(None, relay.latest());

        // Only the first late reply is swallowed
        relay.dispatch(&encode(EventFrame::stream(Event::StateSnapshot { state: blank_snapshot() })));
        assert_eq!(1, seen.load(Ordering::SeqCst));
    }

    #[test]
    fn test_halt_clears_running() {
        let relay = Relay::new();
        let halts = Arc::new(AtomicUsize::new(0));
        {
            let halts = halts.clone();
            relay.subscribers.on_halted(move || { halts.fetch_add(1, Ordering::SeqCst); });
        }

        relay.set_running(true);
        relay.dispatch(&encode(EventFrame::stream(Event::Halted)));
        assert!(!relay.is_running());
        assert_eq!(1, halts.load(Ordering::SeqCst));
    }

    #[test]
    fn test_malformed_snapshot_rejected() {
        let relay = Relay::new();
        let faults = Arc::new(parking_lot::Mutex::new(vec![]));
        {
            let faults = faults.clone();
            relay.subscribers.on_error(move |f| faults.lock().push(f.clone()));
        }

        let mut state = blank_snapshot();
        state.memory.truncate(10);
        let mut reply = relay.expect(CommandId(2));
        relay.dispatch(&encode(EventFrame::reply(CommandId(2), Event::StateSnapshot { state })));

        assert!(matches!(reply.try_recv(), Ok(Err(BridgeError::Protocol(_)))));
        assert!(matches!(faults.lock().as_slice(), [Fault::Protocol(_)]));
        assert_eq!(None, relay.latest());
    }

    #[test]
    fn test_undecodable_event() {
        let relay = Relay::new();
        let faults = Arc::new(AtomicUsize::new(0));
        {
            let faults = faults.clone();
            relay.subscribers.on_error(move |_| { faults.fetch_add(1, Ordering::SeqCst); });
        }

        relay.dispatch("{\"event\":");
        assert_eq!(1, faults.load(Ordering::SeqCst));
    }

    #[test]
    fn test_abandoned_ids_bounded() {
        let relay = Relay::new();
        for id in 0..MAX_ABANDONED as u64 + 10 {
            let _reply = relay.expect(CommandId(id));
            relay.abandon(CommandId(id));
        }

        let correlation = relay.correlation.lock();
        assert_eq!(MAX_ABANDONED, correlation.abandoned.len());
        assert_eq!(Some(&CommandId(10)), correlation.abandoned.first());
    }

    #[test]
    fn test_transport_failure_forgets_abandoned() {
        let relay = Relay::new();
        let faults = Arc::new(parking_lot::Mutex::new(vec![]));
        {
            let faults = faults.clone();
            relay.subscribers.on_error(move |f| faults.lock().push(f.clone()));
        }

        let _late = relay.expect(CommandId(1));
        relay.abandon(CommandId(1));
        let mut waiting = relay.expect(CommandId(2));

        relay.transport_failed("gone".to_owned());
        assert!(relay.correlation.lock().abandoned.is_empty());
        assert_eq!(Ok(Err(BridgeError::Transport("gone".to_owned()))), waiting.try_recv());

        // Someone was told, so subscribers aren't
        assert!(faults.lock().is_empty());
        assert_eq!(Some("gone".to_owned()), relay.fault());
    }
}
